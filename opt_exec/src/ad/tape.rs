//! Scalar reverse-mode differentiation tape
//!
//! The tape is a Wengert list: every operation performed on a [`Scalar`]
//! appends one node recording the operation, its operands and its forward
//! value. [`Tape::backward`] then walks the list in reverse, accumulating
//! adjoints via the chain rule.
//!
//! The tape is mutable shared state scoped to exactly one optimization call.
//! It must be fully reset with [`Tape::clear`] before each new recording;
//! reuse without reset leaks derivatives across iterations.

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A handle to one recorded value on a [`Tape`].
///
/// Handles are only valid for the recording (generation) they were created
/// in; using a stale handle after a [`Tape::clear`] is a programming error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Scalar(usize);

/// The differentiation tape.
pub struct Tape {
    nodes: Vec<TapeNode>,
    generation: u64,
}

/// A single entry in the tape.
struct TapeNode {
    op: Op,
    value: f64,
    adjoint: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Every operation the tape can record.
#[derive(Clone, Copy, Debug)]
enum Op {
    // Leaves
    Var,
    Const,

    // Unary
    Neg(usize),
    Sqrt(usize),
    Abs(usize),
    Relu(usize),
    Square(usize),

    // Binary
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tape {
    /// Create a new empty tape.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            generation: 0,
        }
    }

    /// Begin a new recording, discarding all nodes and adjoints of the
    /// previous one.
    ///
    /// Handles created before the call become stale.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.generation += 1;
    }

    /// The current recording generation, used by handle owners to detect
    /// stale handles.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, op: Op, value: f64) -> Scalar {
        let id = self.nodes.len();
        self.nodes.push(TapeNode {
            op,
            value,
            adjoint: 0.0,
        });
        Scalar(id)
    }

    // ----- Leaf constructors -----

    /// Declare a free variable, a differentiation target.
    pub fn var(&mut self, value: f64) -> Scalar {
        self.push(Op::Var, value)
    }

    /// Record a constant. Constants receive adjoints but are never updated.
    pub fn constant(&mut self, value: f64) -> Scalar {
        self.push(Op::Const, value)
    }

    /// The forward value of a recorded scalar.
    pub fn value(&self, s: Scalar) -> f64 {
        self.nodes[s.0].value
    }

    // ----- Unary ops -----

    pub fn neg(&mut self, a: Scalar) -> Scalar {
        let v = -self.nodes[a.0].value;
        self.push(Op::Neg(a.0), v)
    }

    pub fn sqrt(&mut self, a: Scalar) -> Scalar {
        let v = self.nodes[a.0].value.sqrt();
        self.push(Op::Sqrt(a.0), v)
    }

    pub fn abs(&mut self, a: Scalar) -> Scalar {
        let v = self.nodes[a.0].value.abs();
        self.push(Op::Abs(a.0), v)
    }

    /// `max(a, 0)`, the positive part. Used for penalties that only act
    /// beyond a limit.
    pub fn relu(&mut self, a: Scalar) -> Scalar {
        let v = self.nodes[a.0].value.max(0.0);
        self.push(Op::Relu(a.0), v)
    }

    pub fn square(&mut self, a: Scalar) -> Scalar {
        let v = self.nodes[a.0].value;
        self.push(Op::Square(a.0), v * v)
    }

    // ----- Binary ops -----

    pub fn add(&mut self, a: Scalar, b: Scalar) -> Scalar {
        let v = self.nodes[a.0].value + self.nodes[b.0].value;
        self.push(Op::Add(a.0, b.0), v)
    }

    pub fn sub(&mut self, a: Scalar, b: Scalar) -> Scalar {
        let v = self.nodes[a.0].value - self.nodes[b.0].value;
        self.push(Op::Sub(a.0, b.0), v)
    }

    pub fn mul(&mut self, a: Scalar, b: Scalar) -> Scalar {
        let v = self.nodes[a.0].value * self.nodes[b.0].value;
        self.push(Op::Mul(a.0, b.0), v)
    }

    pub fn div(&mut self, a: Scalar, b: Scalar) -> Scalar {
        let v = self.nodes[a.0].value / self.nodes[b.0].value;
        self.push(Op::Div(a.0, b.0), v)
    }

    // ----- Reverse sweep -----

    /// Run the reverse sweep from `output`, accumulating the adjoint of
    /// every node that `output` depends on.
    ///
    /// After the call [`Tape::grad`] returns `d output / d s` for any
    /// recorded scalar.
    pub fn backward(&mut self, output: Scalar) {
        for node in self.nodes.iter_mut() {
            node.adjoint = 0.0;
        }
        self.nodes[output.0].adjoint = 1.0;

        for i in (0..=output.0).rev() {
            let g = self.nodes[i].adjoint;
            if g == 0.0 {
                continue;
            }

            match self.nodes[i].op {
                Op::Var | Op::Const => (),

                Op::Neg(a) => {
                    self.nodes[a].adjoint -= g;
                }
                Op::Sqrt(a) => {
                    // d sqrt(x) = 1 / (2 sqrt(x)); flat at the origin
                    let out = self.nodes[i].value;
                    if out != 0.0 {
                        self.nodes[a].adjoint += g / (2.0 * out);
                    }
                }
                Op::Abs(a) => {
                    let va = self.nodes[a].value;
                    if va > 0.0 {
                        self.nodes[a].adjoint += g;
                    } else if va < 0.0 {
                        self.nodes[a].adjoint -= g;
                    }
                }
                Op::Relu(a) => {
                    if self.nodes[a].value > 0.0 {
                        self.nodes[a].adjoint += g;
                    }
                }
                Op::Square(a) => {
                    let va = self.nodes[a].value;
                    self.nodes[a].adjoint += g * 2.0 * va;
                }

                Op::Add(a, b) => {
                    self.nodes[a].adjoint += g;
                    self.nodes[b].adjoint += g;
                }
                Op::Sub(a, b) => {
                    self.nodes[a].adjoint += g;
                    self.nodes[b].adjoint -= g;
                }
                Op::Mul(a, b) => {
                    let (va, vb) = (self.nodes[a].value, self.nodes[b].value);
                    self.nodes[a].adjoint += g * vb;
                    self.nodes[b].adjoint += g * va;
                }
                Op::Div(a, b) => {
                    let (va, vb) = (self.nodes[a].value, self.nodes[b].value);
                    self.nodes[a].adjoint += g / vb;
                    self.nodes[b].adjoint -= g * va / (vb * vb);
                }
            }
        }
    }

    /// The adjoint of `s` computed by the last [`Tape::backward`] call.
    pub fn grad(&self, s: Scalar) -> f64 {
        self.nodes[s.0].adjoint
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_arithmetic_grads() {
        let mut tape = Tape::new();

        // f = (x * y + x) / y, at x = 3, y = 2 => f = 4.5
        let x = tape.var(3.0);
        let y = tape.var(2.0);
        let xy = tape.mul(x, y);
        let num = tape.add(xy, x);
        let f = tape.div(num, y);

        assert_eq!(tape.value(f), 4.5);

        tape.backward(f);

        // df/dx = (y + 1) / y = 1.5
        assert!((tape.grad(x) - 1.5).abs() < 1e-12);
        // df/dy = x/y - (xy + x)/y^2 = 1.5 - 2.25 = -0.75
        assert!((tape.grad(y) + 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_sqrt_square_grads() {
        let mut tape = Tape::new();

        // f = sqrt(x^2), at x = -4 => f = 4
        let x = tape.var(-4.0);
        let x2 = tape.square(x);
        let f = tape.sqrt(x2);

        assert_eq!(tape.value(f), 4.0);

        tape.backward(f);

        // df/dx = x / |x| * 1 = -1
        assert!((tape.grad(x) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_relu_gates_gradient() {
        let mut tape = Tape::new();

        let x = tape.var(2.0);
        let limit = tape.constant(5.0);
        let excess = tape.sub(x, limit);
        let gated = tape.relu(excess);
        let f = tape.square(gated);

        assert_eq!(tape.value(f), 0.0);

        tape.backward(f);
        assert_eq!(tape.grad(x), 0.0);
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mut tape = Tape::new();
        let g0 = tape.generation();
        tape.var(1.0);
        tape.clear();
        assert_eq!(tape.len(), 0);
        assert!(tape.generation() > g0);
    }
}
