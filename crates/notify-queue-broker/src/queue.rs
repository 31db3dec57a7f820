use crate::broker::{Broker, Result};
use crate::config::{ConfigError, QueueSetConfig};
use notify_queue_core::Task;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Weighted round-robin over the broker's lanes.
///
/// Each lane holds a credit counter starting at its weight. A dequeue claims
/// from the non-empty lane with the most remaining credit (earlier lanes win
/// ties) and spends one credit; once every credit is spent they all reset.
/// With weights 6/3/1 and every lane non-empty this yields the repeating
/// sequence `c c c c d c d c d l`.
pub struct QueueSet {
    config: QueueSetConfig,
    broker: Arc<dyn Broker>,
    /// Held across the broker claim so concurrent callers serialize
    credits: Mutex<Vec<u32>>,
}

impl QueueSet {
    pub fn new(config: QueueSetConfig, broker: Arc<dyn Broker>) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let credits = config.queues.iter().map(|q| q.weight).collect();
        Ok(QueueSet {
            config,
            broker,
            credits: Mutex::new(credits),
        })
    }

    pub fn config(&self) -> &QueueSetConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Claim the next task according to the lane weights.
    ///
    /// Returns `None` only when every lane is empty.
    pub async fn dequeue(&self) -> Result<Option<Task>> {
        let mut credits = self.credits.lock().await;

        for _ in 0..2 {
            for index in scan_order(&credits) {
                let queue = &self.config.queues[index].name;
                if let Some(task) = self.broker.claim(queue).await? {
                    credits[index] -= 1;
                    if credits.iter().all(|c| *c == 0) {
                        self.reset(&mut credits);
                    }
                    trace!(task_id = %task.id, queue = %queue, "Dequeued task");
                    return Ok(Some(task));
                }
            }

            // Every lane with credit left is empty. Lanes that already spent
            // their credit were never asked, so start a fresh round for them.
            if !credits.iter().any(|c| *c == 0) {
                break;
            }
            self.reset(&mut credits);
        }

        Ok(None)
    }

    fn reset(&self, credits: &mut [u32]) {
        for (credit, queue) in credits.iter_mut().zip(&self.config.queues) {
            *credit = queue.weight;
        }
    }
}

/// Lanes with credit left, most credit first, declaration order on ties
fn scan_order(credits: &[u32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..credits.len()).filter(|i| credits[*i] > 0).collect();
    order.sort_by(|a, b| credits[*b].cmp(&credits[*a]).then(a.cmp(b)));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueWeight;
    use crate::memory::InMemoryBroker;
    use notify_queue_core::{Priority, TaskType};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn task_on(queue: &str) -> Task {
        let mut task = Task::new(TaskType::email(), vec![], Priority::Default).unwrap();
        task.queue = queue.to_string();
        task
    }

    async fn fill(broker: &InMemoryBroker, queue: &str, count: usize) {
        for _ in 0..count {
            broker.enqueue(&task_on(queue)).await.unwrap();
        }
    }

    async fn drain_names(set: &QueueSet, count: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            let task = set.dequeue().await.unwrap().expect("queue ran dry");
            names.push(task.queue);
        }
        names
    }

    fn default_set() -> (Arc<InMemoryBroker>, QueueSet) {
        let config = QueueSetConfig::default();
        let broker = Arc::new(InMemoryBroker::from_config(&config));
        let set = QueueSet::new(config, broker.clone()).unwrap();
        (broker, set)
    }

    #[test]
    fn test_scan_order_breaks_ties_by_declaration() {
        assert_eq!(scan_order(&[3, 3, 1]), vec![0, 1, 2]);
        assert_eq!(scan_order(&[2, 3, 1]), vec![1, 0, 2]);
        assert_eq!(scan_order(&[0, 1, 1]), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_weighted_sequence() {
        let (broker, set) = default_set();
        fill(&broker, "critical", 60).await;
        fill(&broker, "default", 60).await;
        fill(&broker, "low", 60).await;

        let names = drain_names(&set, 10).await;
        let expected = [
            "critical", "critical", "critical", "critical", "default", "critical", "default",
            "critical", "default", "low",
        ];
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_every_window_of_ten_is_six_three_one() {
        let (broker, set) = default_set();
        fill(&broker, "critical", 60).await;
        fill(&broker, "default", 60).await;
        fill(&broker, "low", 60).await;

        let names = drain_names(&set, 50).await;
        for window in names.windows(10) {
            let count = |q: &str| window.iter().filter(|n| n.as_str() == q).count();
            assert_eq!(count("critical"), 6);
            assert_eq!(count("default"), 3);
            assert_eq!(count("low"), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_lanes_are_skipped() {
        let (broker, set) = default_set();
        fill(&broker, "low", 3).await;

        assert_eq!(drain_names(&set, 3).await, vec!["low", "low", "low"]);
        assert!(set.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_credit_lane_is_not_left_idle() {
        let (broker, set) = default_set();
        fill(&broker, "low", 1).await;
        fill(&broker, "critical", 1).await;

        // Low spends its only credit; critical then drains
        assert_eq!(drain_names(&set, 2).await, vec!["critical", "low"]);

        // Low has no credit left but must still be served
        fill(&broker, "low", 1).await;
        assert_eq!(drain_names(&set, 1).await, vec!["low"]);
    }

    #[tokio::test]
    async fn test_low_weight_lane_is_not_starved() {
        let (broker, set) = default_set();
        fill(&broker, "critical", 100).await;
        fill(&broker, "low", 10).await;

        let names = drain_names(&set, 70).await;
        let low = names.iter().filter(|n| n.as_str() == "low").count();
        assert_eq!(low, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_never_returns_same_task() {
        let (broker, set) = default_set();
        fill(&broker, "critical", 40).await;
        fill(&broker, "default", 40).await;
        fill(&broker, "low", 40).await;
        let set = Arc::new(set);

        let workers = (0..8).map(|_| {
            let set = set.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(task) = set.dequeue().await.unwrap() {
                    ids.push(task.id);
                }
                ids
            })
        });

        let mut seen = HashSet::new();
        for ids in futures::future::join_all(workers).await {
            for id in ids.unwrap() {
                assert!(seen.insert(id), "task {id} dequeued twice");
            }
        }
        assert_eq!(seen.len(), 120);
    }

    proptest! {
        #[test]
        fn prop_full_rounds_match_weights(
            weights in proptest::collection::vec(1u32..6, 1..5),
            rounds in 1usize..4,
        ) {
            let config = QueueSetConfig::new(
                weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| QueueWeight::new(format!("q{i}"), *w))
                    .collect(),
            );
            let total: usize = weights.iter().map(|w| *w as usize).sum::<usize>() * rounds;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let names = rt.block_on(async {
                let broker = Arc::new(InMemoryBroker::from_config(&config));
                for q in config.names() {
                    fill(&broker, q, total).await;
                }
                let set = QueueSet::new(config.clone(), broker).unwrap();
                drain_names(&set, total).await
            });

            for (i, weight) in weights.iter().enumerate() {
                let name = format!("q{i}");
                let served = names.iter().filter(|n| **n == name).count();
                prop_assert_eq!(served, *weight as usize * rounds);
            }
        }
    }
}
