//! Non-blocking exchange strategy
//!
//! Receives are posted first, one tagged request per non-self block; the tag
//! of a message is the linear index of the block in the receiver's chart, so
//! no ordering assumption between the two charts is needed. Self blocks are
//! copied straight from the field into their receive slot. Sends are posted
//! as soon as packing completes and everything is awaited before unpacking.
use super::{carve_slots, SideChart, SwitchTopo};
use crate::error::Result;
use mpi::traits::{Communicator, Destination, Source};
use std::collections::HashMap;

pub(super) fn exchange(
    st: &SwitchTopo,
    send: &SideChart,
    recv: &SideChart,
    v: &[f64],
    send_buf: &mut [f64],
    recv_buf: &mut [f64],
) -> Result<()> {
    let sub = st.subcomm();
    let me = st.sub_rank();
    let slot = st.slot_total();

    let recv_slots = carve_slots(
        recv_buf,
        (0..recv.n_blocks())
            .map(|bid| (recv.slot_offset[bid], slot, bid))
            .collect(),
    );
    let mut self_slots: HashMap<usize, &mut [f64]> = HashMap::new();
    let mut remote_slots = Vec::new();
    for (bid, slice) in recv_slots {
        if recv.dest_rank[bid] == me {
            self_slots.insert(bid, slice);
        } else {
            remote_slots.push((bid, slice));
        }
    }

    mpi::request::scope(|scope| {
        let mut requests = Vec::new();
        for (bid, slice) in remote_slots {
            let source = sub.process_at_rank(recv.dest_rank[bid] as i32);
            requests.push(source.immediate_receive_into_with_tag(scope, slice, bid as i32));
        }

        // pack: self blocks land directly in their receive slot, remote
        // blocks go to the send buffer and are put on the wire right away
        for bid in 0..send.n_blocks() {
            if send.dest_rank[bid] == me {
                let target = self_slots
                    .get_mut(&send.dest_tag[bid])
                    .expect("self tags point at own receive blocks");
                st.pack_block(v, send, bid, target);
            } else {
                let offset = send.slot_offset[bid];
                st.pack_block(v, send, bid, &mut send_buf[offset..offset + slot]);
            }
        }
        for bid in 0..send.n_blocks() {
            if send.dest_rank[bid] != me {
                let offset = send.slot_offset[bid];
                let dest = sub.process_at_rank(send.dest_rank[bid] as i32);
                let payload = &send_buf[offset..offset + slot];
                requests.push(dest.immediate_send_with_tag(
                    scope,
                    payload,
                    send.dest_tag[bid] as i32,
                ));
            }
        }

        for request in requests {
            request.wait_without_status();
        }
    });
    Ok(())
}
