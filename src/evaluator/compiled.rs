//! Compiled function-pointer model backend, spec.md §4.3(a).
//!
//! Grounded on the teacher's `nlp::NonlinearProgram`: a plain struct of `fn` pointers plus
//! dimensions, no trait object, no closures captured in the struct — the model is a fixed,
//! statically known piece of code the way the teacher's `f`/`g`/`df`/`dg` fields are.

use crate::errors::EvaluatorError;
use crate::evaluator::{EvalRequest, EvalResult, ModelDims, ModelEvaluator};
use crate::linalg::dense::{Matrix, Vector, VectorRef};

type ResidualFn =
    for<'a> fn(VectorRef<'a>, VectorRef<'a>, VectorRef<'a>, VectorRef<'a>, VectorRef<'a>) -> Option<Vector>;
type JacFn = for<'a> fn(
    VectorRef<'a>,
    VectorRef<'a>,
    VectorRef<'a>,
    VectorRef<'a>,
    VectorRef<'a>,
    &[bool],
) -> Option<Matrix>;
type JacAllFn =
    for<'a> fn(VectorRef<'a>, VectorRef<'a>, VectorRef<'a>, VectorRef<'a>, VectorRef<'a>) -> Option<Matrix>;
type TransposeFn = for<'a> fn(VectorRef<'a>) -> Vector;

/// A model surfaced through function pointers rather than interpreted bytecode.
///
/// Every Jacobian accessor returns `None` on failure (division by zero, domain error) rather
/// than panicking; [`CompiledModel::evaluate_raw`] turns that into
/// [`EvaluatorError::EvaluationFailed`].
pub struct CompiledModel {
    pub dims: ModelDims,
    pub residual: ResidualFn,
    pub jac_x: Option<JacFn>,
    pub jac_a: Option<JacAllFn>,
    pub jac_p: Option<JacFn>,
    pub transpose_x: Option<TransposeFn>,
    pub inverse_transpose_x: Option<TransposeFn>,
    pub transpose_p: Option<TransposeFn>,
    pub inverse_transpose_p: Option<TransposeFn>,
}

impl ModelEvaluator for CompiledModel {
    fn dims(&self) -> ModelDims {
        self.dims
    }

    fn evaluate_raw(&mut self, req: &EvalRequest) -> Result<EvalResult, EvaluatorError> {
        let mut out = EvalResult::default();

        if req.want_r {
            out.r = Some(
                (self.residual)(req.x, req.a, req.p, req.c, req.f)
                    .ok_or(EvaluatorError::EvaluationFailed)?,
            );
        }
        if req.want_jx {
            // A model without analytic derivatives declines by leaving both `None`; the
            // caller (`crate::newton`) falls back to central differences.
            if let (Some(jac_x), Some(jac_a)) = (self.jac_x, self.jac_a) {
                out.jx = Some(
                    jac_x(req.x, req.a, req.p, req.c, req.f, req.x_mask)
                        .ok_or(EvaluatorError::EvaluationFailed)?,
                );
                out.ja = Some(
                    jac_a(req.x, req.a, req.p, req.c, req.f)
                        .ok_or(EvaluatorError::EvaluationFailed)?,
                );
            }
        }
        if req.want_jp {
            let jac_p = self.jac_p.ok_or(EvaluatorError::EvaluationFailed)?;
            out.jp = Some(
                jac_p(req.x, req.a, req.p, req.c, req.f, req.p_mask)
                    .ok_or(EvaluatorError::EvaluationFailed)?,
            );
        }

        Ok(out)
    }

    fn transpose_x(&self, x: VectorRef) -> Vector {
        self.transpose_x.map_or_else(|| x.to_owned(), |f| f(x))
    }

    fn inverse_transpose_x(&self, x_hat: VectorRef) -> Vector {
        self.inverse_transpose_x
            .map_or_else(|| x_hat.to_owned(), |f| f(x_hat))
    }

    fn transpose_p(&self, p: VectorRef) -> Vector {
        self.transpose_p.map_or_else(|| p.to_owned(), |f| f(p))
    }

    fn inverse_transpose_p(&self, p_hat: VectorRef) -> Vector {
        self.inverse_transpose_p
            .map_or_else(|| p_hat.to_owned(), |f| f(p_hat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Col;

    fn diode_residual(
        x: VectorRef,
        _a: VectorRef,
        p: VectorRef,
        _c: VectorRef,
        _f: VectorRef,
    ) -> Option<Vector> {
        let v = x[0];
        let i = x[1];
        let i_s = p[0];
        let vt = p[1];
        Some(Col::from_fn(1, |_| i - i_s * ((v / vt).exp() - 1.0)))
    }

    #[test]
    fn evaluates_a_simple_residual() {
        let model = CompiledModel {
            dims: ModelDims {
                n_r: 1,
                n_x: 2,
                n_a: 0,
                n_p: 2,
                n_c: 0,
                n_f: 0,
            },
            residual: diode_residual,
            jac_x: None,
            jac_a: None,
            jac_p: None,
            transpose_x: None,
            inverse_transpose_x: None,
            transpose_p: None,
            inverse_transpose_p: None,
        };
        let x = Col::<crate::E>::zeros(2);
        let p = Col::from_fn(2, |i| if i == 0 { 1e-14 } else { 0.0259 });
        let empty = Col::<crate::E>::zeros(0);
        let r = (model.residual)(x.as_ref(), empty.as_ref(), p.as_ref(), empty.as_ref(), empty.as_ref()).unwrap();
        assert_eq!(r[0], 0.0);
    }
}
