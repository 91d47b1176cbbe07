/// Rolling Simple Moving Average over a fixed trailing window.
///
/// Returns one entry per input value, aligned by index. Entries are `None`
/// until the warm-up window has elapsed (index `window - 1`), so consumers
/// cannot act on an indicator that is not yet defined.
pub fn sma_series(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);

    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }

    out
}
