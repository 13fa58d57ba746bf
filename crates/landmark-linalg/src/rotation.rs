use crate::mat3::{det_mat33, matmul33};

/// Project a 3x3 cross-covariance matrix onto the nearest proper rotation.
///
/// Computes the SVD of the covariance and forms R = V * U^T, negating the
/// last column of V when the product would be a reflection so the result is
/// always a proper rotation (determinant +1).
///
/// # Arguments
///
/// * `cov` - The cross-covariance matrix `sum (b - b_mean)(a - a_mean)^T`.
///
/// # Returns
///
/// The rotation matrix mapping the a-frame into the b-frame.
pub fn nearest_rotation(cov: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let cov_mat = faer::Mat::<f64>::from_fn(3, 3, |i, j| cov[i][j]);
    let svd = cov_mat.svd();
    let (u_ref, v_ref) = (svd.u(), svd.v());

    let mut u = [[0.0; 3]; 3];
    let mut v = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            u[i][j] = u_ref.read(i, j);
            v[i][j] = v_ref.read(i, j);
        }
    }

    // cov maps a into b, so the rotation is U * V^T
    let v_t = crate::mat3::transpose33(&v);
    let mut r = [[0.0; 3]; 3];
    matmul33(&u, &v_t, &mut r);

    if det_mat33(&r) < 0.0 {
        // reflection case: negate the last column of U
        for row in u.iter_mut() {
            row[2] = -row[2];
        }
        matmul33(&u, &v_t, &mut r);
    }

    r
}
