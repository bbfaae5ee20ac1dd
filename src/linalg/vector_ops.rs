//! Elementwise column-vector helpers used by the Powell-penalty weighting in
//! [`crate::distance`] and the parameter-scale/whitening bookkeeping in [`crate::residual`].

use std::ops::{Div, Mul};

use faer::{Col, ColRef, unzip, zip};

use crate::E;

pub(crate) fn cwise_multiply<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> Col<E>
where
    E: Mul<Output = E>,
{
    let mut out = Col::<E>::zeros(x1.nrows());

    zip!(x1, x2, out.as_mut()).for_each(|unzip!(x1, x2, out)| *out = *x1 * *x2);

    out
}

pub(crate) fn cwise_quotient<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> Col<E>
where
    E: Div<Output = E>,
{
    let mut out = Col::<E>::zeros(x1.nrows());

    zip!(x1, x2, out.as_mut()).for_each(|unzip!(x1, x2, out)| *out = *x1 / *x2);

    out
}

pub(crate) fn cwise_inverse<'a>(x: ColRef<'a, E>) -> Col<E>
where
    E: Div<Output = E>,
{
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, out.as_mut()).for_each(|unzip!(x, out)| *out = E::from(1.) / *x);

    out
}

pub(crate) fn is_col_positive<'a>(x: ColRef<'a, E>) -> bool {
    let mut res = true;
    zip!(x).for_each(|unzip!(x)| {
        if *x <= E::from(0.) {
            res = false
        }
    });
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cwise_quotient() {
        let x1_data = [1.0, 2.0, 3.0];
        let x2_data = [4.0, 5.0, 6.0];
        let x1 = Col::from_fn(x1_data.len(), |i| x1_data[i]);
        let x2 = Col::from_fn(x2_data.len(), |i| x2_data[i]);
        let result = cwise_quotient(x1.as_ref(), x2.as_ref());
        let expected = [0.25, 0.4, 0.5];
        let expected_col = Col::from_fn(expected.len(), |i| expected[i]);
        assert_eq!(result, expected_col);
    }

    #[test]
    fn test_cwise_multiply() {
        let x1_data = [1.0, 2.0, 3.0];
        let x2_data = [4.0, 5.0, 6.0];
        let x1 = Col::from_fn(x1_data.len(), |i| x1_data[i]);
        let x2 = Col::from_fn(x2_data.len(), |i| x2_data[i]);
        let result = cwise_multiply(x1.as_ref(), x2.as_ref());
        let expected = [4.0, 10.0, 18.0];
        let expected_col = Col::from_fn(expected.len(), |i| expected[i]);
        assert_eq!(result, expected_col);
    }

    #[test]
    fn test_cwise_inverse() {
        let x_data = [1.0, 2.0, 4.0];
        let x = Col::from_fn(x_data.len(), |i| x_data[i]);
        let result = cwise_inverse(x.as_ref());
        assert_eq!(result[0], 1.0);
        assert_eq!(result[1], 0.5);
        assert_eq!(result[2], 0.25);
    }

    #[test]
    fn test_is_col_positive() {
        let x1_data = [1.0, 2.0, 3.0];
        let x2_data = [1.0, -2.0, 3.0];
        let x1 = Col::from_fn(x1_data.len(), |i| x1_data[i]);
        let x2 = Col::from_fn(x2_data.len(), |i| x2_data[i]);
        assert!(is_col_positive(x1.as_ref()));
        assert!(!is_col_positive(x2.as_ref()));
    }
}
