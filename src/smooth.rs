use crate::options::MAX_SMOOTHING_PASSES;

/// Majority-vote filter over a label map.
///
/// A pixel's own label weighs 2, each of its (up to four) axis neighbours
/// weighs 1, and the heaviest label wins. Ties go to the label seen first in
/// the order self, left, right, up, down. Every pass reads the previous
/// pass's snapshot only. Zero passes return an unchanged copy; more than
/// [`MAX_SMOOTHING_PASSES`] are capped.
pub fn smooth_labels(labels: &[u16], width: u32, height: u32, passes: usize) -> Vec<u16> {
    let passes = passes.min(MAX_SMOOTHING_PASSES);
    let mut current = labels.to_vec();
    let w = width as usize;
    let h = height as usize;
    if passes == 0 || w * h == 0 || current.len() != w * h {
        return current;
    }

    let max_label = current.iter().copied().max().unwrap_or(0) as usize;
    let mut counter = vec![0u32; max_label + 1];
    let mut touched = [0u16; 5];

    for _ in 0..passes {
        let mut next = vec![0u16; current.len()];
        for y in 0..h {
            for x in 0..w {
                let idx = y * w + x;
                let own = current[idx];
                let mut used = 0usize;
                let mut vote = |label: u16, weight: u32| {
                    if counter[label as usize] == 0 {
                        touched[used] = label;
                        used += 1;
                    }
                    counter[label as usize] += weight;
                };
                vote(own, 2);
                if x > 0 {
                    vote(current[idx - 1], 1);
                }
                if x + 1 < w {
                    vote(current[idx + 1], 1);
                }
                if y > 0 {
                    vote(current[idx - w], 1);
                }
                if y + 1 < h {
                    vote(current[idx + w], 1);
                }

                let mut best = own;
                let mut best_score = 0u32;
                for &label in &touched[..used] {
                    let score = counter[label as usize];
                    if score > best_score {
                        best_score = score;
                        best = label;
                    }
                    counter[label as usize] = 0;
                }
                next[idx] = best;
            }
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_passes_is_identity() {
        let labels = vec![3, 1, 4, 1, 5, 9, 2, 6, 5];
        assert_eq!(smooth_labels(&labels, 3, 3, 0), labels);
    }

    #[test]
    fn isolated_pixel_is_absorbed() {
        let labels = vec![0, 0, 0, 0, 7, 0, 0, 0, 0];
        assert_eq!(smooth_labels(&labels, 3, 3, 1), vec![0; 9]);
    }

    #[test]
    fn own_label_wins_ties() {
        // Center has two 1-neighbours and two 2-neighbours: 2+0 vs 2 vs 2.
        let labels = vec![
            9, 1, 9, //
            2, 0, 2, //
            9, 1, 9,
        ];
        let out = smooth_labels(&labels, 3, 3, 1);
        assert_eq!(out[4], 0);
    }

    #[test]
    fn reads_previous_snapshot_only() {
        // A single row; in-place updates would cascade left to right.
        let labels = vec![1, 1, 0, 0, 0];
        let out = smooth_labels(&labels, 5, 1, 1);
        assert_eq!(out, vec![1, 1, 0, 0, 0]);
    }
}
