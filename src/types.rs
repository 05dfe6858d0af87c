//! Common types and enums shared across the solver
use num_complex::Complex;

/// Complex sample type used throughout the spectral stages
pub type Cplx = Complex<f64>;

/// Boundary condition attached to one face of the domain, per component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// Even symmetry (homogeneous Neumann)
    Even,
    /// Odd symmetry (homogeneous Dirichlet)
    Odd,
    /// Periodic wrap-around
    Periodic,
    /// Free-space (unbounded) condition
    Unbounded,
}

/// Choice of the Green's function family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenKind {
    /// Singular kernel with cell-averaged origin
    Chat2,
    /// Gaussian-regularized kernel, 2nd order
    Hej2,
    /// Gaussian-regularized kernel, 4th order
    Hej4,
    /// Gaussian-regularized kernel, 6th order
    Hej6,
    /// Lattice Green's function of the 2nd order Laplacian
    Lgf2,
}

impl GreenKind {
    /// Kernels that carry a smoothing length scale
    pub fn is_regularized(self) -> bool {
        matches!(self, Self::Hej2 | Self::Hej4 | Self::Hej6)
    }

    /// Kernels whose closed form assumes `dx = dy = dz`: the regularized
    /// family (their smoothing length is a single scalar) and the lattice
    /// kernel (tabulated on a cubic stencil)
    pub fn needs_isotropic_spacing(self) -> bool {
        matches!(self, Self::Hej2 | Self::Hej4 | Self::Hej6 | Self::Lgf2)
    }
}

/// What the solver computes from the right-hand side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    /// phi with lap(phi) = rhs
    Std,
    /// curl of phi, for rotational (vortex) formulations
    Rot,
}

/// Direction of a transform or of a topology switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Physical to spectral / input to output topology
    Forward,
    /// Spectral to physical / output to input topology
    Backward,
}

/// How pencil chunks are exchanged between process grids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStrategy {
    /// One collective vector all-to-all per switch
    AllToAll,
    /// Per-block tagged non-blocking messages
    NonBlocking,
}

/// Boundary conditions of the whole domain: `bc[dim][side][component]`
pub type BoundaryTable = [[Vec<BoundaryKind>; 2]; 3];

/// Build a boundary table with the same condition on every face and component
pub fn uniform_bc(kind: BoundaryKind, lda: usize) -> BoundaryTable {
    let face = || vec![kind; lda];
    [[face(), face()], [face(), face()], [face(), face()]]
}
