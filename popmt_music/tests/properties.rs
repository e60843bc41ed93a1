// Property tests for windowing, word exchange and sampling.

use popmt_music::exchange::WordExchange;
use popmt_music::key::{self, DetectedKey, KeyMode, PitchClass};
use popmt_music::sampling::temperature_sampling;
use popmt_music::segment::{build_groups, forward_windows, group_windows, reverse_windows};
use popmt_music::vocab::Vocabulary;
use popmt_prng::TuneRng;
use proptest::prelude::*;

fn arb_words() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..300, 0..400)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn windows_are_full_and_shifted_by_one(words in arb_words(), x_len in 1usize..40) {
        for window in forward_windows(&words, x_len).iter().chain(&reverse_windows(&words, x_len)) {
            prop_assert_eq!(window.x.len(), x_len);
            prop_assert_eq!(window.y.len(), x_len);
            prop_assert_eq!(&window.x[1..], &window.y[..x_len - 1]);
        }
    }

    #[test]
    fn forward_windows_tile_from_the_start(len in 0usize..400, x_len in 1usize..40) {
        let words: Vec<usize> = (0..len).collect();
        let windows = forward_windows(&words, x_len);
        prop_assert_eq!(windows.len(), len.saturating_sub(1) / x_len);
        for (i, window) in windows.iter().enumerate() {
            prop_assert_eq!(window.x[0], i * x_len);
        }
    }

    #[test]
    fn reverse_windows_are_contiguous_and_end_at_the_tail(len in 0usize..400, x_len in 1usize..40) {
        let words: Vec<usize> = (0..len).collect();
        let windows = reverse_windows(&words, x_len);
        if let Some(last) = windows.last() {
            prop_assert_eq!(*last.y.last().unwrap(), len - 1);
        }
        for pair in windows.windows(2) {
            prop_assert_eq!(pair[1].x[0], pair[0].x[0] + x_len);
        }
    }

    #[test]
    fn groups_are_always_full(words in arb_words(), x_len in 1usize..20, group_size in 1usize..6) {
        for group in build_groups(&words, x_len, group_size) {
            prop_assert_eq!(group.len(), group_size);
        }
    }

    #[test]
    fn group_count_follows_the_stride(n_windows in 0usize..60, group_size in 1usize..8) {
        let words: Vec<usize> = (0..n_windows * 3 + 1).collect();
        let windows = forward_windows(&words, 3);
        prop_assert_eq!(windows.len(), n_windows);
        let groups = group_windows(windows, group_size);
        let expected = (0..n_windows)
            .step_by(2 * group_size)
            .filter(|&start| start + group_size <= n_windows)
            .count();
        prop_assert_eq!(groups.len(), expected);
    }

    #[test]
    fn exchange_preserves_the_shift(seed in any::<u64>(), picks in prop::collection::vec(0usize..6, 2..60)) {
        let vocab = Vocabulary::remi(true);
        let set: Vec<String> = ["C", "D", "E", "F", "G", "A"]
            .iter()
            .map(|r| format!("Chord_{r}:maj"))
            .collect();
        let exchange = WordExchange::resolve(&[set.clone()], &vocab).unwrap();
        let source: Vec<usize> = picks.iter().map(|&i| vocab.lookup(&set[i]).unwrap()).collect();
        let n = source.len() - 1;
        let mut x = vec![source[..n].to_vec()];
        let mut y = vec![source[1..].to_vec()];
        let mapping = exchange.draw(&mut TuneRng::new(seed));
        WordExchange::apply(&mapping, &mut x, &mut y);
        prop_assert_eq!(&x[0][1..], &y[0][..n - 1]);
        let members: Vec<usize> = set.iter().map(|k| vocab.lookup(k).unwrap()).collect();
        prop_assert!(x[0].iter().chain(&y[0]).all(|w| members.contains(w)));
    }

    #[test]
    fn greedy_sampling_is_argmax(
        logits in prop::collection::vec(-50.0f32..50.0, 1..64),
        temperature in 0.01f64..100.0,
        seed in any::<u64>(),
    ) {
        let mut rng = TuneRng::new(seed);
        let picked = temperature_sampling(&logits, temperature, 1, &mut rng).unwrap();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let first_max = logits.iter().position(|&l| l == max).unwrap();
        prop_assert_eq!(picked, first_max);
    }

    #[test]
    fn topk_sampling_stays_in_range(
        logits in prop::collection::vec(-10.0f32..10.0, 1..64),
        topk in 1usize..80,
        seed in any::<u64>(),
    ) {
        let mut rng = TuneRng::new(seed);
        let picked = temperature_sampling(&logits, 1.0, topk, &mut rng).unwrap();
        prop_assert!(picked < logits.len());
        let better = logits.iter().filter(|&&l| l > logits[picked]).count();
        prop_assert!(better < topk);
    }

    #[test]
    fn transposition_lands_on_target(tonic in 0i32..12, target in 0i32..12, minor in any::<bool>()) {
        let detected = DetectedKey {
            tonic: PitchClass::from_semitone(tonic),
            mode: if minor { KeyMode::Minor } else { KeyMode::Major },
        };
        let target = PitchClass::from_semitone(target);
        let steps = key::transposition_steps(detected, target);
        prop_assert!((-5..=6).contains(&steps));
        let landing = if minor { target.transposed(-3) } else { target };
        prop_assert_eq!(detected.tonic.transposed(steps), landing);
    }
}
