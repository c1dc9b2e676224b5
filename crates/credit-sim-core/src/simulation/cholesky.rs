use crate::simulation::config::CorrelationMatrix;

/// Correlation matrix over `labels`, taken from `supplied` where both labels
/// are present and identity elsewhere. Asymmetric pairs are averaged, the
/// diagonal is forced to 1.0 and entries are clamped into [-1, 1].
///
/// Returns the matrix and whether any entry had to be repaired.
pub fn aligned_matrix(labels: &[String], supplied: &CorrelationMatrix) -> (Vec<Vec<f64>>, bool) {
    let n = labels.len();
    let positions: Vec<Option<usize>> = labels
        .iter()
        .map(|l| supplied.labels.iter().position(|s| s == l))
        .collect();
    let mut repaired = false;
    let mut m = vec![vec![0.0_f64; n]; n];

    for i in 0..n {
        m[i][i] = 1.0;
        for j in 0..i {
            let (Some(pi), Some(pj)) = (positions[i], positions[j]) else {
                continue;
            };
            let a = supplied.values[pi][pj];
            let b = supplied.values[pj][pi];
            let mut rho = if (a - b).abs() > 1e-12 {
                repaired = true;
                0.5 * (a + b)
            } else {
                a
            };
            if !(-1.0..=1.0).contains(&rho) {
                repaired = true;
                rho = rho.clamp(-1.0, 1.0);
            }
            m[i][j] = rho;
            m[j][i] = rho;
        }
        if let Some(pi) = positions[i] {
            if (supplied.values[pi][pi] - 1.0).abs() > 1e-12 {
                repaired = true;
            }
        }
    }

    (m, repaired)
}

/// Lower-triangular Cholesky factor `L` with `L Lᵀ ≈ matrix`.
///
/// Negative pivots are clamped to zero and entries below a zero pivot are
/// set to zero, so non-positive-definite input degrades to a lower
/// effective correlation instead of failing.
pub fn cholesky_lower(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0_f64; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                l[i][i] = (matrix[i][i] - sum).max(0.0).sqrt();
            } else if l[j][j] > 0.0 {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }

    l
}

/// `out[i] = Σ_{j≤i} L[i][j] · independent[j]`.
pub fn correlate(l: &[Vec<f64>], independent: &[f64], out: &mut [f64]) {
    for (i, row) in l.iter().enumerate() {
        out[i] = row
            .iter()
            .zip(independent)
            .take(i + 1)
            .map(|(lij, z)| lij * z)
            .sum();
    }
}
