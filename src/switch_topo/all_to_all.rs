//! Collective exchange strategy
//!
//! After packing, one vector all-to-all inside the sub-communicator moves
//! every block slot to its destination segment; when every pairwise count is
//! identical the symmetric collective is used instead.
use super::{SideChart, SwitchTopo};
use crate::error::Result;
use mpi::datatype::{Partition, PartitionMut};
use mpi::traits::CommunicatorCollectives;
use mpi::Count;

pub(super) fn exchange(
    st: &SwitchTopo,
    send: &SideChart,
    recv: &SideChart,
    send_buf: &mut [f64],
    recv_buf: &mut [f64],
) -> Result<()> {
    let sub = st.subcomm();
    if st.is_all2all() {
        let chunk = send.count[0];
        let n = chunk * send.count.len();
        sub.all_to_all_into(&send_buf[..n], &mut recv_buf[..n]);
    } else {
        let scounts: Vec<Count> = send.count.iter().map(|&c| c as Count).collect();
        let sdispls: Vec<Count> = send.displ.iter().map(|&c| c as Count).collect();
        let rcounts: Vec<Count> = recv.count.iter().map(|&c| c as Count).collect();
        let rdispls: Vec<Count> = recv.displ.iter().map(|&c| c as Count).collect();
        let packed = Partition::new(&send_buf[..send.total], scounts, sdispls);
        let mut received = PartitionMut::new(&mut recv_buf[..recv.total], rcounts, rdispls);
        sub.all_to_all_varcount_into(&packed, &mut received);
    }
    Ok(())
}
