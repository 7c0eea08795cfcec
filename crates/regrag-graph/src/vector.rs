//! Small dense-vector helpers shared by graph building, routing and ranking.

/// Dot product over the common prefix.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// L2-normalized copy; zero vectors stay zero.
pub fn normalized(a: &[f32]) -> Vec<f32> {
    let n = norm(a);
    if n < 1e-9 {
        return a.to_vec();
    }
    a.iter().map(|x| x / n).collect()
}

/// Cosine similarity; 0.0 when either side is empty, zero or of another length.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let denom = norm(a) * norm(b);
    if denom < 1e-9 {
        return 0.0;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0)
}

/// Weighted mean of vectors sharing the dimension of the first one.
/// Returns None when nothing usable is given.
pub fn weighted_mean<'a, I>(items: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut acc: Option<Vec<f32>> = None;
    let mut total = 0.0f32;
    for (vector, weight) in items {
        if weight <= 0.0 || vector.is_empty() {
            continue;
        }
        let sum = acc.get_or_insert_with(|| vec![0.0; vector.len()]);
        if sum.len() != vector.len() {
            continue;
        }
        for (s, v) in sum.iter_mut().zip(vector) {
            *s += v * weight;
        }
        total += weight;
    }
    let mut sum = acc?;
    if total <= 0.0 {
        return None;
    }
    for s in sum.iter_mut() {
        *s /= total;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_weighted_mean_skips_mismatched() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [5.0];
        let mean = weighted_mean(vec![(&a[..], 3.0), (&b[..], 1.0), (&c[..], 10.0)]).unwrap();
        assert!((mean[0] - 0.75).abs() < 1e-6);
        assert!((mean[1] - 0.25).abs() < 1e-6);
        assert!(weighted_mean(Vec::<(&[f32], f32)>::new()).is_none());
    }
}
