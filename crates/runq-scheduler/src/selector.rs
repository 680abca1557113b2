//! Process-wide queue strategy selection.

use runq_core::{Error, QueueSnapshotStrategy, Result, StrategyKind};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Holds both strategies and the currently selected one.
///
/// A poll reads the selection once through [`StrategySelector::current`] and
/// keeps that strategy until it finishes, so switching never hands a poll a
/// mix of both.
pub struct StrategySelector {
    direct_scan: Arc<dyn QueueSnapshotStrategy>,
    projection: Arc<dyn QueueSnapshotStrategy>,
    selected: watch::Sender<StrategyKind>,
}

impl StrategySelector {
    pub fn new(
        direct_scan: Arc<dyn QueueSnapshotStrategy>,
        projection: Arc<dyn QueueSnapshotStrategy>,
        initial: StrategyKind,
    ) -> Result<Self> {
        if direct_scan.kind() != StrategyKind::DirectScan {
            return Err(Error::InvalidInput(format!(
                "expected a direct-scan strategy, got {}",
                direct_scan.kind()
            )));
        }
        if projection.kind() != StrategyKind::Projection {
            return Err(Error::InvalidInput(format!(
                "expected a projection strategy, got {}",
                projection.kind()
            )));
        }

        let (selected, _) = watch::channel(initial);
        Ok(Self {
            direct_scan,
            projection,
            selected,
        })
    }

    pub fn selected(&self) -> StrategyKind {
        *self.selected.borrow()
    }

    /// Switch strategies. Polls already in flight finish on the old one.
    pub fn select(&self, kind: StrategyKind) {
        let previous = self.selected.send_replace(kind);
        if previous != kind {
            info!(from = %previous, to = %kind, "Switched queue strategy");
        }
    }

    /// The strategy new polls should use.
    pub fn current(&self) -> Arc<dyn QueueSnapshotStrategy> {
        self.strategy(self.selected())
    }

    pub fn strategy(&self, kind: StrategyKind) -> Arc<dyn QueueSnapshotStrategy> {
        match kind {
            StrategyKind::DirectScan => self.direct_scan.clone(),
            StrategyKind::Projection => self.projection.clone(),
        }
    }

    /// Watch for strategy switches.
    pub fn subscribe(&self) -> watch::Receiver<StrategyKind> {
        self.selected.subscribe()
    }
}
