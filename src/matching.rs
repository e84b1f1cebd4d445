use crate::freesound::SoundSummary;

/// Pick the result whose duration is closest to `target`.
///
/// Ties keep the earliest result, so the remote relevance ranking decides
/// between equally good durations.
pub fn select_best(results: &[SoundSummary], target: f64) -> Option<&SoundSummary> {
    let mut best: Option<(&SoundSummary, f64)> = None;
    for sound in results {
        let diff = (sound.duration - target).abs();
        match best {
            Some((_, best_diff)) if diff >= best_diff => {}
            _ => best = Some((sound, diff)),
        }
    }
    best.map(|(sound, _)| sound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sound(id: u64, duration: f64) -> SoundSummary {
        SoundSummary {
            id,
            name: format!("sound {id}"),
            duration,
            ..Default::default()
        }
    }

    #[test]
    fn empty_results_select_nothing() {
        assert!(select_best(&[], 1.0).is_none());
    }

    #[test]
    fn closest_duration_wins() {
        let results = [sound(1, 4.0), sound(2, 1.4), sound(3, 0.2), sound(4, 2.0)];
        assert_eq!(select_best(&results, 1.5).unwrap().id, 2);
        assert_eq!(select_best(&results, 0.0).unwrap().id, 3);
        assert_eq!(select_best(&results, 10.0).unwrap().id, 1);
    }

    #[test]
    fn ties_keep_remote_order() {
        let results = [sound(1, 3.0), sound(2, 1.0), sound(3, 3.0)];
        assert_eq!(select_best(&results, 2.0).unwrap().id, 1);
    }

    #[test]
    fn result_minimizes_absolute_difference() {
        let durations = [0.3, 7.5, 2.25, 2.75, 11.0, 0.0, 5.1];
        let results: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| sound(i as u64, *d))
            .collect();

        for target in [0.0, 0.5, 2.5, 3.0, 6.0, 9.9, 100.0] {
            let best = select_best(&results, target).unwrap();
            let best_diff = (best.duration - target).abs();
            assert!(
                results
                    .iter()
                    .all(|s| (s.duration - target).abs() >= best_diff),
                "target {target}: {} is not minimal",
                best.id
            );
        }
    }
}
