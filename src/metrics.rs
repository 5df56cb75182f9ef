use std::sync::LazyLock;

use anyhow::Result;
use prometheus::*;

static METRIC_EMBED_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("prodsim_embed_count", "count of embedded product images", &["result"])
        .unwrap()
});

static METRIC_WINDOW_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "prodsim_window_duration",
        "duration of one batch window in seconds",
        &["flow"]
    )
    .unwrap()
});

static METRIC_WRITE_BACK_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("prodsim_write_back_count", "count of products whose similar ids were written")
        .unwrap()
});

/// Counts one embedding attempt
pub fn inc_embed(ok: bool) {
    METRIC_EMBED_COUNT.with_label_values(&[embed_label(ok)]).inc();
}

/// Embedding attempts counted so far with this result
pub fn embed_count(ok: bool) -> u64 {
    METRIC_EMBED_COUNT.with_label_values(&[embed_label(ok)]).get()
}

fn embed_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "failed" }
}

pub fn observe_window(flow: &str, seconds: f64) {
    METRIC_WINDOW_DURATION.with_label_values(&[flow]).observe(seconds);
}

pub fn inc_write_back(count: usize) {
    METRIC_WRITE_BACK_COUNT.inc_by(count as u64);
}

/// Pushes every registered metric to a push gateway
pub async fn push(url: String, instance: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        prometheus::push_metrics(
            "prodsim",
            labels! { "instance".to_string() => instance },
            &url,
            prometheus::gather(),
            None,
        )
    })
    .await??;
    Ok(())
}
