//! Single-run orchestration: extract, append, compare, maybe alert.

use crate::extractor::Extract;
use crate::history::{HistoryStore, PricePair};
use crate::notifier::{MessageGateway, Notifier};
use tracing::{debug, error, info};

/// Stage a run aborted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Done { alerted: bool },
    Aborted { stage: Stage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Extracting,
    Persisting,
    Comparing,
    Alerting,
    Done,
    Aborted,
}

pub struct PriceWatchPipeline<E, S, G> {
    extractor: E,
    store: S,
    notifier: Notifier<G>,
}

impl<E, S, G> PriceWatchPipeline<E, S, G>
where
    E: Extract,
    S: HistoryStore,
    G: MessageGateway,
{
    pub fn new(extractor: E, store: S, notifier: Notifier<G>) -> Self {
        Self {
            extractor,
            store,
            notifier,
        }
    }

    /// One linear pass, no retries, no re-entrancy. Infallible by contract:
    /// every failure is logged at its origin and mapped into the outcome.
    pub fn run(&mut self) -> RunOutcome {
        let mut state = RunState::Idle;

        advance(&mut state, RunState::Extracting);
        let record = match self.extractor.extract() {
            Ok(record) => record,
            Err(err) => {
                error!(error = %err, "extraction failed; nothing persisted");
                advance(&mut state, RunState::Aborted);
                return RunOutcome::Aborted {
                    stage: Stage::Extraction,
                };
            }
        };

        advance(&mut state, RunState::Persisting);
        if let Err(err) = self.store.append(&record) {
            error!(error = %err, "could not append observation; record discarded");
            advance(&mut state, RunState::Aborted);
            return RunOutcome::Aborted {
                stage: Stage::Persistence,
            };
        }

        advance(&mut state, RunState::Comparing);
        let comparison = match self.store.last_two_prices() {
            Ok(comparison) => comparison,
            Err(err) => {
                error!(error = %err, "could not read back price history");
                advance(&mut state, RunState::Aborted);
                return RunOutcome::Aborted {
                    stage: Stage::Persistence,
                };
            }
        };

        let alerted = match comparison {
            Some(PricePair { previous, current }) if previous > current => {
                info!(previous, current, "price drop detected");
                advance(&mut state, RunState::Alerting);
                // The append above stands whether or not delivery works.
                self.notifier.alert(&record.name, record.price);
                true
            }
            Some(PricePair { previous, current }) => {
                info!(previous, current, "no price drop");
                false
            }
            None => {
                info!("fewer than two observations; comparison unavailable");
                false
            }
        };

        advance(&mut state, RunState::Done);
        RunOutcome::Done { alerted }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "pipeline transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractError;
    use crate::history::StoreError;
    use crate::models::ProductRecord;
    use crate::notifier::NotifyError;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    struct FakeExtractor {
        price: u64,
        fail: bool,
    }

    impl Extract for FakeExtractor {
        fn extract(&self) -> Result<ProductRecord, ExtractError> {
            if self.fail {
                return Err(ExtractError::UnparsablePrice {
                    text: "currently unavailable".into(),
                });
            }
            Ok(ProductRecord::new(
                "Legion 5i Pro",
                self.price,
                "https://retail.test/dp/B0LEGION",
                "82RF00DYIN",
            ))
        }
    }

    #[derive(Default)]
    struct MemoryHistory {
        prices: Rc<RefCell<Vec<u64>>>,
        fail_append: bool,
        fail_read: bool,
    }

    fn store_failure() -> StoreError {
        StoreError::Malformed {
            row: 2,
            reason: "backing store unavailable".into(),
        }
    }

    impl HistoryStore for MemoryHistory {
        fn append(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
            if self.fail_append {
                return Err(store_failure());
            }
            self.prices.borrow_mut().push(record.price);
            Ok(())
        }

        fn last_two_prices(&self) -> Result<Option<PricePair>, StoreError> {
            if self.fail_read {
                return Err(store_failure());
            }
            let prices = self.prices.borrow();
            if prices.len() < 2 {
                return Ok(None);
            }
            Ok(Some(PricePair {
                previous: prices[prices.len() - 2],
                current: prices[prices.len() - 1],
            }))
        }
    }

    #[derive(Default, Clone)]
    struct RecordingGateway {
        sent: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl MessageGateway for RecordingGateway {
        fn send_message(
            &self,
            _recipient: &str,
            text: &str,
            _settle: Duration,
        ) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Url {
                    url: "gateway".into(),
                    source: url::ParseError::EmptyHost,
                });
            }
            self.sent.borrow_mut().push(text.to_string());
            Ok(())
        }

        fn confirm_send(&self) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn pipeline(
        extractor: FakeExtractor,
        store: MemoryHistory,
        gateway: RecordingGateway,
    ) -> PriceWatchPipeline<FakeExtractor, MemoryHistory, RecordingGateway> {
        let notifier = Notifier::new(gateway, "+911234567890", Duration::ZERO);
        PriceWatchPipeline::new(extractor, store, notifier)
    }

    fn preloaded(prices: &[u64]) -> MemoryHistory {
        let store = MemoryHistory::default();
        store.prices.borrow_mut().extend_from_slice(prices);
        store
    }

    #[test]
    fn strict_drop_alerts_with_the_new_price() {
        let store = preloaded(&[164990]);
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 159990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(pipeline.run(), RunOutcome::Done { alerted: true });
        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("159990"));
    }

    #[test]
    fn equal_price_does_not_alert() {
        let store = preloaded(&[159990]);
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 159990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(pipeline.run(), RunOutcome::Done { alerted: false });
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn price_increase_does_not_alert() {
        let store = preloaded(&[159990]);
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 164990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(pipeline.run(), RunOutcome::Done { alerted: false });
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn first_observation_has_no_comparison() {
        let store = MemoryHistory::default();
        let prices = store.prices.clone();
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 164990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(pipeline.run(), RunOutcome::Done { alerted: false });
        assert_eq!(*prices.borrow(), vec![164990]);
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn extraction_failure_aborts_with_zero_writes() {
        let store = MemoryHistory::default();
        let prices = store.prices.clone();
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 0,
                fail: true,
            },
            store,
            gateway,
        );

        assert_eq!(
            pipeline.run(),
            RunOutcome::Aborted {
                stage: Stage::Extraction
            }
        );
        assert!(prices.borrow().is_empty());
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn append_failure_aborts_and_discards_the_record() {
        let store = MemoryHistory {
            fail_append: true,
            ..MemoryHistory::default()
        };
        let prices = store.prices.clone();
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 159990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(
            pipeline.run(),
            RunOutcome::Aborted {
                stage: Stage::Persistence
            }
        );
        assert!(prices.borrow().is_empty());
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn read_back_failure_aborts_without_alerting() {
        let store = MemoryHistory {
            fail_read: true,
            ..MemoryHistory::default()
        };
        let gateway = RecordingGateway::default();
        let sent = gateway.sent.clone();
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 159990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(
            pipeline.run(),
            RunOutcome::Aborted {
                stage: Stage::Persistence
            }
        );
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn alert_failure_still_finishes_the_run() {
        let store = preloaded(&[164990]);
        let prices = store.prices.clone();
        let gateway = RecordingGateway {
            fail: true,
            ..RecordingGateway::default()
        };
        let mut pipeline = pipeline(
            FakeExtractor {
                price: 159990,
                fail: false,
            },
            store,
            gateway,
        );

        assert_eq!(pipeline.run(), RunOutcome::Done { alerted: true });
        // The observation row is not rolled back.
        assert_eq!(*prices.borrow(), vec![164990, 159990]);
    }
}
