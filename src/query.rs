use crate::models::Provider;

/// Provider with the lowest current latency; the earlier registration wins ties.
pub fn fastest_provider(providers: &[Provider]) -> Option<&Provider> {
    providers
        .iter()
        .filter_map(|p| p.stats.current.map(|ms| (p, ms)))
        .fold(None, |best: Option<(&Provider, f64)>, (p, ms)| match best {
            Some((_, best_ms)) if best_ms <= ms => best,
            _ => Some((p, ms)),
        })
        .map(|(p, _)| p)
}

/// Mean of the current latencies that are present, rounded to whole milliseconds.
pub fn average_latency(providers: &[Provider]) -> Option<f64> {
    let (sum, n) = providers
        .iter()
        .filter_map(|p| p.stats.current)
        .fold((0.0, 0u32), |(sum, n), ms| (sum + ms, n + 1));

    if n == 0 {
        return None;
    }
    let mean = (sum / f64::from(n)).round();
    mean.is_finite().then_some(mean)
}
