//! Shamir / Feldman secret sharing helpers over secp256k1

use crate::{Error, Result};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;

/// Random polynomial of the given degree with a chosen or random constant term
pub fn random_polynomial(degree: usize, constant: Option<Scalar>) -> Vec<Scalar> {
    let mut rng = OsRng;
    let mut coefficients = Vec::with_capacity(degree + 1);
    coefficients.push(constant.unwrap_or_else(|| Scalar::random(&mut rng)));
    for _ in 0..degree {
        coefficients.push(Scalar::random(&mut rng));
    }
    coefficients
}

/// Evaluate polynomial at a point
pub fn evaluate_polynomial(coefficients: &[Scalar], x: u64) -> Scalar {
    let x_scalar = Scalar::from(x);
    let mut result = Scalar::ZERO;
    let mut x_power = Scalar::ONE;

    for coef in coefficients {
        result += *coef * x_power;
        x_power *= x_scalar;
    }

    result
}

/// Feldman commitments `a_c·G` to each coefficient
pub fn commit(coefficients: &[Scalar]) -> Vec<ProjectivePoint> {
    coefficients
        .iter()
        .map(|coef| ProjectivePoint::GENERATOR * coef)
        .collect()
}

/// Evaluate committed polynomial "in the exponent": `Σ C_c·x^c`
pub fn evaluate_commitments(commitments: &[ProjectivePoint], x: u64) -> ProjectivePoint {
    let x_scalar = Scalar::from(x);
    let mut result = ProjectivePoint::IDENTITY;
    let mut x_power = Scalar::ONE;

    for commitment in commitments {
        result += *commitment * x_power;
        x_power *= x_scalar;
    }

    result
}

/// Check a share received at evaluation point `x` against its dealer's commitments
pub fn verify_share(share: &Scalar, commitments: &[ProjectivePoint], x: u64) -> bool {
    ProjectivePoint::GENERATOR * share == evaluate_commitments(commitments, x)
}

/// Lagrange coefficient at zero for `x_i` over the given evaluation points.
///
/// `x_i` must be one of `points`; a repeated point makes the coefficient
/// undefined and is an error.
pub fn lagrange_at_zero(x_i: u64, points: &[u64]) -> Result<Scalar> {
    let own = points
        .iter()
        .position(|&x| x == x_i)
        .ok_or_else(|| Error::InvalidInput(format!("evaluation point {} not in set", x_i)))?;

    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for (position, &x_j) in points.iter().enumerate() {
        if position == own {
            continue;
        }
        numerator *= Scalar::from(x_j);
        denominator *= Scalar::from(x_j) - Scalar::from(x_i);
    }

    let inverse = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::Crypto("duplicate evaluation points".into()))?;
    Ok(numerator * inverse)
}

/// Recover `f(0)` from `(x, f(x))` pairs
pub fn interpolate_at_zero(shares: &[(u64, Scalar)]) -> Result<Scalar> {
    let points: Vec<u64> = shares.iter().map(|(x, _)| *x).collect();
    let mut result = Scalar::ZERO;
    for (x, y) in shares {
        result += *y * lagrange_at_zero(*x, &points)?;
    }
    Ok(result)
}

/// Interpret a byte string as a big-endian integer reduced mod the curve order.
///
/// The empty string is zero.
pub fn message_scalar(message: &[u8]) -> Scalar {
    let radix = Scalar::from(256u64);
    message
        .iter()
        .fold(Scalar::ZERO, |acc, byte| acc * radix + Scalar::from(*byte as u64))
}

/// `x(P) mod n` and the parity of `y(P)`
pub fn x_coordinate(point: &ProjectivePoint) -> Result<(Scalar, bool)> {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() != 33 {
        return Err(Error::Crypto("point at infinity has no x coordinate".into()));
    }
    let x: [u8; 32] = bytes[1..]
        .try_into()
        .map_err(|_| Error::Internal("Invalid x coordinate".into()))?;
    let r = <Scalar as Reduce<U256>>::reduce_bytes(&x.into());
    Ok((r, bytes[0] == 0x03))
}

pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    scalar.to_bytes().into()
}

/// Decode a canonical scalar
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr((*bytes).into()))
        .ok_or_else(|| Error::InvalidInput("scalar out of range".into()))
}

/// Compressed SEC1 encoding
pub fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decode a SEC1 point
pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::InvalidInput(format!("invalid point encoding: {}", e)))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::InvalidInput("point not on curve".into()))?;
    Ok(ProjectivePoint::from(affine))
}
