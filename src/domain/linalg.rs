//! Small dense linear algebra helpers.
//!
//! Systems solved here are tiny (one row per feature), so a direct
//! Gaussian elimination is all that is needed.

/// Pivots smaller than this are treated as zero.
const PIVOT_EPSILON: f64 = 1e-12;

/// Solve `a · x = b` for square `a` using Gaussian elimination with partial
/// pivoting. Returns `None` when the system is singular or malformed.
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Weighted least squares: minimize `Σ wᵢ (yᵢ − rowᵢ · β)²`.
///
/// Solves the normal equations `(Aᵀ W A) β = Aᵀ W y`. A small ridge term can be
/// added to keep near-singular designs solvable.
pub fn weighted_least_squares(
    rows: &[Vec<f64>],
    targets: &[f64],
    weights: &[f64],
    ridge: f64,
) -> Option<Vec<f64>> {
    let p = rows.first()?.len();
    if rows.len() != targets.len() || rows.len() != weights.len() {
        return None;
    }

    let mut ata = vec![vec![0.0; p]; p];
    let mut aty = vec![0.0; p];
    for ((row, &y), &w) in rows.iter().zip(targets).zip(weights) {
        if row.len() != p {
            return None;
        }
        for i in 0..p {
            let wi = w * row[i];
            aty[i] += wi * y;
            for j in 0..p {
                ata[i][j] += wi * row[j];
            }
        }
    }
    for (i, row) in ata.iter_mut().enumerate() {
        row[i] += ridge;
    }
    solve(ata, aty)
}

/// Column means of a non-empty matrix.
pub fn column_means(rows: &[Vec<f64>]) -> Option<Vec<f64>> {
    let width = rows.first()?.len();
    let mut sums = vec![0.0; width];
    for row in rows {
        if row.len() != width {
            return None;
        }
        for (s, v) in sums.iter_mut().zip(row) {
            *s += v;
        }
    }
    let n = rows.len() as f64;
    Some(sums.into_iter().map(|s| s / n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_2x2() {
        // 2x + y = 5, x - y = 1  =>  x = 2, y = 1
        let x = solve(vec![vec![2.0, 1.0], vec![1.0, -1.0]], vec![5.0, 1.0]).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        let x = solve(vec![vec![0.0, 1.0], vec![1.0, 0.0]], vec![3.0, 4.0]).unwrap();
        assert_eq!(x, vec![4.0, 3.0]);
    }

    #[test]
    fn test_singular_system() {
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
        assert!(solve(vec![vec![1.0]], vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn test_weighted_least_squares_recovers_line() {
        // y = 3 + 2x, with intercept column
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![1.0, i as f64]).collect();
        let targets: Vec<f64> = (0..5).map(|i| 3.0 + 2.0 * i as f64).collect();
        let beta = weighted_least_squares(&rows, &targets, &[1.0; 5], 0.0).unwrap();
        assert!((beta[0] - 3.0).abs() < 1e-9);
        assert!((beta[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_column_means() {
        let means = column_means(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(means, vec![2.0, 4.0]);
        assert!(column_means(&[]).is_none());
    }
}
