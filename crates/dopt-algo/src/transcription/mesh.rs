//! Mesh elements and their relative lengths.

use dopt_core::{DoptError, DoptResult};

const LENGTH_SUM_TOL: f64 = 1e-10;

/// Element length fractions of the horizon, with running sums.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    fractions: Vec<f64>,
    cumulative: Vec<f64>,
}

impl Mesh {
    /// `lengths` must sum to one unless `free_timing` is set, in which case
    /// they are normalized and only seed the initial guess.
    pub fn new(n_e: usize, lengths: Option<&[f64]>, free_timing: bool) -> DoptResult<Self> {
        if n_e == 0 {
            return Err(DoptError::config("mesh needs at least one element"));
        }
        let fractions = match lengths {
            None => vec![1.0 / n_e as f64; n_e],
            Some(h) => {
                if h.len() != n_e {
                    return Err(DoptError::config(format!(
                        "{} element lengths given for {n_e} elements",
                        h.len()
                    )));
                }
                if let Some(bad) = h.iter().find(|&&v| !(v > 0.0 && v.is_finite())) {
                    return Err(DoptError::config(format!(
                        "element lengths must be positive, got {bad}"
                    )));
                }
                let sum: f64 = h.iter().sum();
                if free_timing {
                    h.iter().map(|v| v / sum).collect()
                } else if (sum - 1.0).abs() > LENGTH_SUM_TOL {
                    return Err(DoptError::config(format!(
                        "element lengths sum to {sum}, expected 1"
                    )));
                } else {
                    h.to_vec()
                }
            }
        };
        let mut cumulative = Vec::with_capacity(n_e + 1);
        let mut acc = 0.0;
        cumulative.push(0.0);
        for f in &fractions {
            acc += f;
            cumulative.push(acc);
        }
        // Pin the last boundary so the horizon end is hit exactly.
        cumulative[n_e] = 1.0;
        Ok(Self {
            fractions,
            cumulative,
        })
    }

    pub fn n_e(&self) -> usize {
        self.fractions.len()
    }

    pub fn fraction(&self, element: usize) -> f64 {
        self.fractions[element]
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    /// Horizon fraction at boundary `i` (0 = start, n_e = end).
    pub fn boundary(&self, i: usize) -> f64 {
        self.cumulative[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_mesh() {
        let mesh = Mesh::new(4, None, false).unwrap();
        assert_eq!(mesh.fraction(2), 0.25);
        assert_eq!(mesh.boundary(4), 1.0);
        assert_eq!(mesh.boundary(2), 0.5);
    }

    #[test]
    fn test_lengths_must_sum_to_one() {
        assert!(matches!(
            Mesh::new(2, Some(&[0.5, 0.6]), false),
            Err(DoptError::Configuration(_))
        ));
        let mesh = Mesh::new(2, Some(&[1.0, 3.0]), true).unwrap();
        assert_eq!(mesh.fractions(), &[0.25, 0.75]);
    }

    #[test]
    fn test_length_count_mismatch() {
        assert!(Mesh::new(3, Some(&[0.5, 0.5]), false).is_err());
        assert!(Mesh::new(0, None, false).is_err());
    }
}
