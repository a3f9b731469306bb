//! Property tests over randomly shaped straight-line kernels.

use proptest::prelude::*;

use skein_ir::{Block, GateKind, Kernel, KernelBuilder};
use skein_opt::{allocate_qubits, WIRE_SET};

/// One measured wire per entry, with the entry's number of H gates
/// before the measurement.
fn straight_line_kernel(gate_counts: &[usize]) -> Kernel {
    let mut b = KernelBuilder::new("random");
    let mut body = Block::default();
    let mut bits = vec![];
    for (slot, &gates) in gate_counts.iter().enumerate() {
        let mut q = b.borrow_wire(&mut body, WIRE_SET, slot as u32);
        for _ in 0..gates {
            q = b.gate1(&mut body, GateKind::H, q).unwrap();
        }
        let (m, q) = b.measure(&mut body, q).unwrap();
        bits.push(b.discriminate(&mut body, m).unwrap());
        b.return_wire(&mut body, q).unwrap();
    }
    b.ret(&mut body, &bits);
    b.finish(body)
}

fn count_ops(kernel: &Kernel, name: &str) -> usize {
    kernel.body.ops.iter().filter(|op| op.name() == name).count()
}

proptest! {
    /// Independent measured wires all end on the final cycle, so none
    /// can reuse another's qubit and the pass must not conjure slots
    /// beyond one per wire either.
    #[test]
    fn prop_parallel_wires_one_qubit_each(
        gate_counts in prop::collection::vec(0usize..4, 1..6)
    ) {
        let n = gate_counts.len();
        let mut kernel = straight_line_kernel(&gate_counts);
        allocate_qubits(&mut kernel).unwrap();

        prop_assert_eq!(kernel.num_qubits, Some(n as u32));
        prop_assert_eq!(count_ops(&kernel, "borrow_wire"), n);
        prop_assert_eq!(count_ops(&kernel, "return_wire"), n);
    }

    /// Regeneration preserves the operation mix: nothing is dropped,
    /// duplicated, or invented.
    #[test]
    fn prop_op_counts_preserved(
        gate_counts in prop::collection::vec(0usize..4, 1..6)
    ) {
        let n = gate_counts.len();
        let mut kernel = straight_line_kernel(&gate_counts);
        allocate_qubits(&mut kernel).unwrap();

        prop_assert_eq!(count_ops(&kernel, "h"), gate_counts.iter().sum::<usize>());
        prop_assert_eq!(count_ops(&kernel, "mz"), n);
        prop_assert_eq!(count_ops(&kernel, "discriminate"), n);
        prop_assert_eq!(count_ops(&kernel, "return"), 1);
        prop_assert_eq!(kernel.result_tys.len(), n);
    }

    /// Running the pass on its own output is a fixed point.
    #[test]
    fn prop_allocation_idempotent(
        gate_counts in prop::collection::vec(0usize..4, 1..4)
    ) {
        let mut kernel = straight_line_kernel(&gate_counts);
        allocate_qubits(&mut kernel).unwrap();
        let first = kernel.to_string();
        allocate_qubits(&mut kernel).unwrap();
        prop_assert_eq!(kernel.to_string(), first);
    }

    /// Every gate appears after the borrow of its wire and before its
    /// wire's measurement in the regenerated program order.
    #[test]
    fn prop_linear_order_preserved(gates in 1usize..5) {
        let mut kernel = straight_line_kernel(&[gates]);
        allocate_qubits(&mut kernel).unwrap();

        let names: Vec<&str> = kernel.body.ops.iter().map(|op| op.name()).collect();
        let borrow = names.iter().position(|&n| n == "borrow_wire").unwrap();
        let mz = names.iter().position(|&n| n == "mz").unwrap();
        for (i, &name) in names.iter().enumerate() {
            if name == "h" {
                prop_assert!(borrow < i && i < mz);
            }
        }
    }
}
