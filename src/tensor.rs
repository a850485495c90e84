use crate::error::{AutogradError, Result};
use itertools::{iproduct, izip, Itertools};

pub type Scalar = f64;

/// Dense row-major payload of rank 0, 1 or 2.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<Scalar>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<Scalar>) -> Result<Self> {
        if shape.len() > 2 || shape.iter().product::<usize>() != data.len() {
            return Err(AutogradError::InvalidData {
                len: data.len(),
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: Scalar) -> Self {
        Self {
            shape: vec![],
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<Scalar>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn matrix(rows: usize, cols: usize, data: Vec<Scalar>) -> Result<Self> {
        Self::new(vec![rows, cols], data)
    }

    /// Builds a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<Scalar>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if !rows.iter().map(Vec::len).all_equal() {
            return Err(AutogradError::InvalidData {
                len: rows.iter().map(Vec::len).sum(),
                shape: vec![rows.len(), cols],
            });
        }
        Self::matrix(rows.len(), cols, rows.concat())
    }

    /// Panics if `shape` has rank above 2.
    pub fn full(shape: &[usize], value: Scalar) -> Self {
        assert!(shape.len() <= 2, "tensors are at most rank 2");
        Self {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.)
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shape)
    }

    pub fn ones_like(&self) -> Self {
        Self::ones(&self.shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[Scalar] {
        &self.data
    }

    pub fn into_data(self) -> Vec<Scalar> {
        self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the tensor holds exactly one element, whatever its rank.
    pub fn is_scalar_like(&self) -> bool {
        self.data.len() == 1
    }

    /// The single element of a scalar-like tensor.
    pub fn item(&self) -> Option<Scalar> {
        if self.is_scalar_like() {
            Some(self.data[0])
        } else {
            None
        }
    }

    pub fn row(&self, index: usize) -> Result<Tensor> {
        match self.shape[..] {
            [rows, cols] if index < rows => Ok(Self::vector(
                self.data[index * cols..(index + 1) * cols].to_vec(),
            )),
            _ => Err(AutogradError::ShapeMismatch {
                expected: vec![index + 1, 0],
                actual: self.shape.clone(),
                operation: "row".to_string(),
            }),
        }
    }

    pub fn map(&self, mut f: impl FnMut(Scalar) -> Scalar) -> Tensor {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Rows `start..end` of a matrix, or elements `start..end` of a vector.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Tensor> {
        let out_of_range = || AutogradError::ShapeMismatch {
            expected: vec![end],
            actual: self.shape.clone(),
            operation: "slice_rows".to_string(),
        };
        if start > end {
            return Err(out_of_range());
        }
        match self.shape[..] {
            [rows, cols] if end <= rows => Self::matrix(
                end - start,
                cols,
                self.data[start * cols..end * cols].to_vec(),
            ),
            [len] if end <= len => Ok(Self::vector(self.data[start..end].to_vec())),
            _ => Err(out_of_range()),
        }
    }

    /// Elementwise combination. Equal shapes pair up element by element; a
    /// scalar-like operand is broadcast against the other one.
    pub fn zip_map(
        &self,
        other: &Tensor,
        operation: &str,
        f: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Result<Tensor> {
        if self.shape == other.shape {
            let data = izip!(&self.data, &other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Ok(Self {
                shape: self.shape.clone(),
                data,
            });
        }
        match (self.item(), other.item()) {
            (_, Some(b)) => Ok(self.map(|a| f(a, b))),
            (Some(a), _) => Ok(other.map(|b| f(a, b))),
            _ => Err(AutogradError::IncompatibleShapes {
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
                operation: operation.to_string(),
            }),
        }
    }

    /// Folds a broadcast gradient back onto `shape`. Only equal or
    /// scalar-like targets occur, matching what `zip_map` broadcasts.
    pub fn sum_to(&self, shape: &[usize]) -> Tensor {
        if self.shape == shape {
            self.clone()
        } else {
            Self::full(shape, self.sum())
        }
    }

    pub fn sum(&self) -> Scalar {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> Scalar {
        self.sum() / self.data.len() as Scalar
    }

    pub fn matvec(&self, vector: &Tensor) -> Result<Tensor> {
        let incompatible = || AutogradError::IncompatibleShapes {
            lhs: self.shape.clone(),
            rhs: vector.shape.clone(),
            operation: "matrix-vector product".to_string(),
        };
        let (rows, cols) = match self.shape[..] {
            [rows, cols] => (rows, cols),
            _ => return Err(incompatible()),
        };
        if vector.shape != [cols] {
            return Err(incompatible());
        }
        let data = if cols == 0 {
            vec![0.; rows]
        } else {
            self.data
                .chunks(cols)
                .map(|row| izip!(row, &vector.data).map(|(a, b)| a * b).sum::<Scalar>())
                .collect()
        };
        Ok(Self::vector(data))
    }

    /// Swaps the axes of a matrix; lower ranks are returned unchanged.
    pub fn transpose(&self) -> Tensor {
        match self.shape[..] {
            [rows, cols] => Self {
                shape: vec![cols, rows],
                data: iproduct!(0..cols, 0..rows)
                    .map(|(j, i)| self.data[i * cols + j])
                    .collect(),
            },
            _ => self.clone(),
        }
    }

    pub fn outer(&self, other: &Tensor) -> Result<Tensor> {
        if self.rank() != 1 || other.rank() != 1 {
            return Err(AutogradError::IncompatibleShapes {
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
                operation: "outer product".to_string(),
            });
        }
        Ok(Self {
            shape: vec![self.len(), other.len()],
            data: iproduct!(&self.data, &other.data)
                .map(|(a, b)| a * b)
                .collect(),
        })
    }

    /// Largest absolute elementwise difference.
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<Scalar> {
        let diff = self.zip_map(other, "difference", |a, b| (a - b).abs())?;
        Ok(diff.data.into_iter().fold(0., Scalar::max))
    }
}

impl From<Scalar> for Tensor {
    fn from(value: Scalar) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<Scalar>> for Tensor {
    fn from(data: Vec<Scalar>) -> Self {
        Self::vector(data)
    }
}

impl std::ops::AddAssign<&Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &Tensor) {
        assert_eq!(self.shape, rhs.shape, "Mismatched accumulation shapes.");
        izip!(&mut self.data, &rhs.data).for_each(|(acc, x)| *acc += x);
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let render = |xs: &[Scalar]| xs.iter().map(|x| format!("{x:.06}")).join(", ");
        match self.shape[..] {
            [] => fmt.write_fmt(format_args!("{:.06}", self.data[0])),
            [_] => fmt.write_fmt(format_args!("[{}]", render(&self.data))),
            [_, cols] => {
                let rows = if cols == 0 {
                    String::new()
                } else {
                    self.data
                        .chunks(cols)
                        .map(|row| format!("[{}]", render(row)))
                        .join(", ")
                };
                fmt.write_fmt(format_args!("[{}]", rows))
            }
            _ => unreachable!("tensors are at most rank 2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::*;

    #[test]
    fn test_new_rejects_bad_length() {
        let err = Tensor::new(vec![2, 2], vec![1., 2., 3.]).unwrap_err();
        assert_eq!(
            err,
            AutogradError::InvalidData {
                len: 3,
                shape: vec![2, 2]
            }
        );
    }

    #[test]
    fn test_new_rejects_rank_three() {
        assert!(Tensor::new(vec![1, 1, 1], vec![1.]).is_err());
    }

    #[test]
    fn test_from_rows() {
        let m = Tensor::from_rows(&[vec![1., 2.], vec![3., 4.]]).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m.data(), &[1., 2., 3., 4.]);

        assert!(Tensor::from_rows(&[vec![1., 2.], vec![3.]]).is_err());
    }

    #[test]
    fn test_zip_map_broadcasts_scalar() {
        let v = Tensor::vector(vec![1., 2., 3.]);
        let s = Tensor::scalar(10.);

        assert_eq!(v.zip_map(&s, "add", |a, b| a + b).unwrap().data(), &[11., 12., 13.]);
        assert_eq!(s.zip_map(&v, "sub", |a, b| a - b).unwrap().data(), &[9., 8., 7.]);
    }

    #[test]
    fn test_zip_map_incompatible() {
        let a = Tensor::vector(vec![1., 2.]);
        let b = Tensor::vector(vec![1., 2., 3.]);
        assert!(matches!(
            a.zip_map(&b, "add", |a, b| a + b),
            Err(AutogradError::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn test_sum_to_scalar() {
        let g = Tensor::vector(vec![1., 2., 3.]);
        assert_eq!(g.sum_to(&[]), Tensor::scalar(6.));
        assert_eq!(g.sum_to(&[3]), g);
    }

    #[test]
    fn test_matvec() {
        let a = Tensor::matrix(2, 3, vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let w = Tensor::vector(vec![1., 0., -1.]);
        assert_eq!(a.matvec(&w).unwrap().data(), &[-2., -2.]);

        assert!(a.matvec(&Tensor::vector(vec![1., 2.])).is_err());
    }

    #[test]
    fn test_transpose_and_outer() {
        let a = Tensor::matrix(2, 3, vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let t = a.transpose();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data(), &[1., 4., 2., 5., 3., 6.]);

        let o = Tensor::vector(vec![1., 2.])
            .outer(&Tensor::vector(vec![3., 4., 5.]))
            .unwrap();
        assert_eq!(o.shape(), &[2, 3]);
        assert_eq!(o.data(), &[3., 4., 5., 6., 8., 10.]);
    }

    #[test]
    fn test_slice_rows() {
        let a = Tensor::matrix(3, 2, vec![1., 2., 3., 4., 5., 6.]).unwrap();
        let s = a.slice_rows(1, 3).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.data(), &[3., 4., 5., 6.]);

        let v = Tensor::vector(vec![1., 2., 3.]);
        assert_eq!(v.slice_rows(0, 1).unwrap().data(), &[1.]);
        assert!(v.slice_rows(2, 4).is_err());
    }

    #[test]
    fn test_row() {
        let a = Tensor::matrix(2, 2, vec![1., 2., 3., 4.]).unwrap();
        assert_eq!(a.row(1).unwrap().data(), &[3., 4.]);
        assert!(a.row(2).is_err());
    }

    #[test]
    fn test_mean_and_max_abs_diff() {
        let a = Tensor::vector(vec![1., 2., 3., 6.]);
        assert_float_eq!(a.mean(), 3.0, abs <= 1e-10);

        let b = Tensor::vector(vec![1., 2.5, 3., 5.]);
        assert_float_eq!(a.max_abs_diff(&b).unwrap(), 1.0, abs <= 1e-10);
    }

    #[test]
    fn test_display() {
        assert_eq!(Tensor::scalar(1.).to_string(), "1.000000");
        assert_eq!(Tensor::vector(vec![1., 2.]).to_string(), "[1.000000, 2.000000]");
        assert_eq!(
            Tensor::matrix(2, 1, vec![1., 2.]).unwrap().to_string(),
            "[[1.000000], [2.000000]]"
        );
    }
}
