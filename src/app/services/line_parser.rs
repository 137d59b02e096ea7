//! Line parser worker pool
//!
//! Parser workers share the single line queue. Each worker takes one line at
//! a time, parses it, and forwards the record to the queue of its device
//! type. Lines that fail to parse, or whose device type has no queue, are
//! counted as errors and dropped.

use crate::app::models::{AppIdPolicy, AppsInstalled};
use crate::app::services::stats::LoadStats;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Line queue receiver shared by every parser worker
pub type SharedLines = Arc<Mutex<mpsc::Receiver<String>>>;

/// Device type → sender of that category's record queue
///
/// Dropping the last handle to the routing table closes every category queue.
pub type CategoryRoutes = HashMap<String, mpsc::Sender<AppsInstalled>>;

/// One parser worker
pub struct LineParser {
    worker_id: usize,
    lines: SharedLines,
    routes: Arc<CategoryRoutes>,
    policy: AppIdPolicy,
}

impl LineParser {
    pub fn new(
        worker_id: usize,
        lines: SharedLines,
        routes: Arc<CategoryRoutes>,
        policy: AppIdPolicy,
    ) -> Self {
        Self {
            worker_id,
            lines,
            routes,
            policy,
        }
    }

    /// Consume lines until the line queue is closed and drained
    pub async fn run(self) -> LoadStats {
        let mut stats = LoadStats::new();
        debug!("Parser {} started", self.worker_id);

        loop {
            let line = {
                let mut lines = self.lines.lock().await;
                lines.recv().await
            };
            let Some(line) = line else {
                break;
            };

            stats.record_line();
            if let Err(e) = self.route(line).await {
                warn!("{}", e);
                stats.record_error();
            }
        }

        debug!("Parser {} finished: {}", self.worker_id, stats.summary());
        stats
    }

    /// Parse one line and push the record onto its category queue
    pub async fn route(&self, line: String) -> Result<()> {
        let record = match AppsInstalled::parse_with_policy(&line, self.policy) {
            Ok(record) => record,
            Err(e) => return Err(Error::line_parse(line, e)),
        };

        let Some(queue) = self.routes.get(&record.dev_type) else {
            return Err(Error::unknown_category(record.dev_type));
        };

        let device_type = record.dev_type.clone();
        queue
            .send(record)
            .await
            .map_err(|_| Error::queue_closed(device_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        lines: mpsc::Sender<String>,
        idfa: mpsc::Receiver<AppsInstalled>,
        parser: LineParser,
    }

    fn harness(policy: AppIdPolicy) -> Harness {
        let (lines_tx, lines_rx) = mpsc::channel(16);
        let (idfa_tx, idfa_rx) = mpsc::channel(16);
        let routes: CategoryRoutes = [("idfa".to_string(), idfa_tx)].into_iter().collect();

        Harness {
            lines: lines_tx,
            idfa: idfa_rx,
            parser: LineParser::new(
                0,
                Arc::new(Mutex::new(lines_rx)),
                Arc::new(routes),
                policy,
            ),
        }
    }

    #[tokio::test]
    async fn test_routes_known_device_type() {
        let mut h = harness(AppIdPolicy::Coerce);
        h.parser
            .route("idfa\tabc\t55.5\t37.5\t42,43".to_string())
            .await
            .unwrap();

        let record = h.idfa.recv().await.unwrap();
        assert_eq!(record.key(), "idfa:abc");
        assert_eq!(record.apps, vec![42, 43]);
    }

    #[tokio::test]
    async fn test_unknown_device_type_is_dropped() {
        let mut h = harness(AppIdPolicy::Coerce);
        let err = h
            .parser
            .route("unknown\tabc\t1.0\t1.0\t1".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownCategory { ref device_type } if device_type == "unknown"));
        assert!(h.idfa.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unparsable_line_is_reported() {
        let h = harness(AppIdPolicy::Coerce);
        let err = h
            .parser
            .route("idfa\tabc\tnorth\t1.0\t1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LineParse { .. }));
    }

    #[tokio::test]
    async fn test_closed_category_queue_is_an_error() {
        let Harness { parser, idfa, .. } = harness(AppIdPolicy::Coerce);
        drop(idfa);

        let err = parser
            .route("idfa\tabc\t1.0\t1.0\t1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueClosed { .. }));
    }

    #[tokio::test]
    async fn test_run_counts_every_line() {
        let Harness {
            lines,
            mut idfa,
            parser,
        } = harness(AppIdPolicy::Reject);

        for line in [
            "idfa\ta\t1\t2\t3",
            "idfa\tb\t1\t2\tx",
            "gaid\tc\t1\t2\t3",
            "short",
            "idfa\td\t1\t2\t4,5",
        ] {
            lines.send(line.to_string()).await.unwrap();
        }
        drop(lines);

        let stats = parser.run().await;
        assert_eq!(stats, LoadStats { total: 5, errors: 3 });

        let mut keys = Vec::new();
        while let Ok(record) = idfa.try_recv() {
            keys.push(record.key());
        }
        assert_eq!(keys, vec!["idfa:a", "idfa:d"]);
    }

    #[tokio::test]
    async fn test_workers_share_one_queue() {
        let (lines_tx, lines_rx) = mpsc::channel(4);
        let (idfa_tx, mut idfa_rx) = mpsc::channel(64);
        let shared: SharedLines = Arc::new(Mutex::new(lines_rx));
        let routes: Arc<CategoryRoutes> =
            Arc::new([("idfa".to_string(), idfa_tx)].into_iter().collect());

        let handles: Vec<_> = (0..3)
            .map(|id| {
                let parser =
                    LineParser::new(id, shared.clone(), routes.clone(), AppIdPolicy::Coerce);
                tokio::spawn(parser.run())
            })
            .collect();
        drop(routes);

        for i in 0..40 {
            lines_tx
                .send(format!("idfa\tdev{}\t1\t2\t3", i))
                .await
                .unwrap();
        }
        drop(lines_tx);

        let mut total = LoadStats::new();
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, LoadStats { total: 40, errors: 0 });

        let mut received = 0;
        while idfa_rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 40);
    }
}
