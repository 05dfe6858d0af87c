//! Run example:
//!
//! cargo mpirun --np 4 --bin poisfft --release
//!
//! Solves a fully periodic Poisson problem with a product-of-sines right
//! hand side and reports the maximum error against the analytic solution.
use mpi::collective::SystemOperation;
use mpi::traits::{Communicator, CommunicatorCollectives};
use poisfft::solver::Solver;
use poisfft::topology::Topology;
use poisfft::types::{uniform_bc, BoundaryKind, ExchangeStrategy, SolveMode};
use poisfft::utils::{collapsed_index, pencil_nproc};
use std::f64::consts::PI;

fn main() {
    let universe = mpi::initialize().expect("mpi initialization failed");
    let world = universe.world();
    let size = world.size() as usize;

    let n = 32;
    let h = 1.0 / n as f64;
    let nproc = pencil_nproc(0, size);

    let topo = Topology::new(
        0,
        1,
        [n; 3],
        nproc,
        false,
        None,
        poisfft::DEFAULT_ALIGNMENT,
        &world,
    )
    .expect("topology");
    let bc = uniform_bc(BoundaryKind::Periodic, 1);
    let mut solver = Solver::new(
        topo,
        &bc,
        [h; 3],
        [1.0; 3],
        0,
        ExchangeStrategy::AllToAll,
    )
    .expect("solver construction");
    solver.setup(None).expect("solver setup");

    // rhs = sin(2 pi x) sin(2 pi y) sin(2 pi z); phi = -rhs / (12 pi^2)
    let layout = *solver.topology_physical().layout();
    let mut rhs = vec![0.0; layout.mem_size()];
    let mut phi = vec![0.0; layout.mem_size()];
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    for i2 in 0..layout.nloc[ax2] {
        for i1 in 0..layout.nloc[ax1] {
            for i0 in 0..layout.nloc[ax0] {
                let mut g = [0usize; 3];
                g[ax0] = layout.start_id(ax0) + i0;
                g[ax1] = layout.start_id(ax1) + i1;
                g[ax2] = layout.start_id(ax2) + i2;
                let x = (g[0] as f64) * h;
                let y = (g[1] as f64) * h;
                let z = (g[2] as f64) * h;
                let id = collapsed_index(ax0, i0, i1 + layout.nloc[ax1] * i2, layout.nmem, 1);
                rhs[id] = (2.0 * PI * x).sin() * (2.0 * PI * y).sin() * (2.0 * PI * z).sin();
            }
        }
    }

    solver
        .solve(&mut phi, &rhs, SolveMode::Std)
        .expect("solve");

    let mut local_err: f64 = 0.0;
    for i2 in 0..layout.nloc[ax2] {
        for i1 in 0..layout.nloc[ax1] {
            for i0 in 0..layout.nloc[ax0] {
                let id = collapsed_index(ax0, i0, i1 + layout.nloc[ax1] * i2, layout.nmem, 1);
                let expect = -rhs[id] / (12.0 * PI * PI);
                local_err = local_err.max((phi[id] - expect).abs());
            }
        }
    }
    let mut err = 0.0;
    world.all_reduce_into(&local_err, &mut err, SystemOperation::max());
    if world.rank() == 0 {
        println!("periodic {n}^3 on {size} ranks: max error = {err:.3e}");
    }
}
