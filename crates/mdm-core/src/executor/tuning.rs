//! Fragment-count adjustment from an already-known size estimate.

use crate::strategy::{DownloadMode, Strategy};

const MIB: u64 = 1024 * 1024;

/// Pick a fragment count for a known size. Without a size hint, or for single-fragment
/// strategies, the strategy is returned unchanged; no request is ever made to learn the size.
pub fn tune_concurrency(strategy: &Strategy, size_hint: Option<u64>) -> Strategy {
    let ceiling = strategy.concurrent_fragments();
    let Some(size) = size_hint.filter(|s| *s > 0) else {
        return *strategy;
    };
    if ceiling <= 1 {
        return *strategy;
    }

    let n = if size < 10 * MIB {
        1
    } else if size < 50 * MIB {
        4.min(ceiling)
    } else if strategy.mode() == DownloadMode::Speed {
        if size > 100 * MIB {
            16
        } else {
            8
        }
    } else {
        8.min(ceiling)
    };
    strategy.with_concurrent_fragments(n.min(ceiling))
}
