//! End-to-end tests of the qubit allocation pass on whole kernels.

use skein_ir::{Block, GateKind, Kernel, KernelBuilder, OpKind};
use skein_opt::{allocate_qubits, AnalysisError, Pass, QubitAllocationPass, WIRE_SET};

fn count_ops(block: &Block, name: &str) -> usize {
    block.ops.iter().filter(|op| op.name() == name).count()
}

fn find_if(kernel: &Kernel) -> (&Block, &Block) {
    for op in &kernel.body.ops {
        if let OpKind::If { then_blk, else_blk } = &op.kind {
            return (then_blk, else_blk);
        }
    }
    panic!("kernel has no conditional");
}

/// A Bell-style kernel: both wires are alive while the entangling gate
/// runs, so neither can share the other's qubit.
#[test]
fn test_overlapping_wires_need_two_qubits() {
    let mut b = KernelBuilder::new("bell");
    let mut body = Block::default();
    let q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);
    let q0 = b.gate1(&mut body, GateKind::H, q0).unwrap();
    let outs = b.gate(&mut body, GateKind::CX, &[], &[q0, q1]).unwrap();
    let (m0, q0) = b.measure(&mut body, outs[0]).unwrap();
    let (m1, q1) = b.measure(&mut body, outs[1]).unwrap();
    let b0 = b.discriminate(&mut body, m0).unwrap();
    let b1 = b.discriminate(&mut body, m1).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    b.return_wire(&mut body, q1).unwrap();
    b.ret(&mut body, &[b0, b1]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    assert_eq!(kernel.num_qubits, Some(2));
    assert_eq!(count_ops(&kernel.body, "borrow_wire"), 2);
    assert_eq!(count_ops(&kernel.body, "return_wire"), 2);
    assert_eq!(count_ops(&kernel.body, "cx"), 1);
    assert_eq!(count_ops(&kernel.body, "mz"), 2);
}

/// A wire used only inside a conditional that runs after the first
/// wire is measured: the allocation is contracted into the branch that
/// needs it, and both wires end up on the same physical qubit.
#[test]
fn test_branch_local_wire_contracted_and_reused() {
    let mut b = KernelBuilder::new("cond_reuse");
    let mut body = Block::default();
    let q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    let (m, q0) = b.measure(&mut body, q0).unwrap();
    let bit = b.discriminate(&mut body, m).unwrap();
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);

    let mut then_blk = b.block_with_wire_args(1);
    let targ = then_blk.args[0];
    let tq = b.gate1(&mut then_blk, GateKind::X, targ).unwrap();
    b.yield_wires(&mut then_blk, &[tq]);
    let mut else_blk = b.block_with_wire_args(1);
    let earg = else_blk.args[0];
    b.yield_wires(&mut else_blk, &[earg]);

    let outs = b.if_op(&mut body, bit, &[q1], then_blk, else_blk).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    b.return_wire(&mut body, outs[0]).unwrap();
    b.ret(&mut body, &[bit]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    assert_eq!(kernel.num_qubits, Some(1));
    // One physical wire threads both virtual wires.
    assert_eq!(count_ops(&kernel.body, "borrow_wire"), 1);
    assert_eq!(count_ops(&kernel.body, "return_wire"), 1);

    let (then_blk, else_blk) = find_if(&kernel);
    assert_eq!(count_ops(then_blk, "x"), 1);
    assert_eq!(count_ops(else_blk, "x"), 0);
}

/// Both branches begin with the same gate on the same wire: the gate
/// is hoisted out of the conditional and runs once unconditionally.
#[test]
fn test_common_branch_prefix_hoisted() {
    let mut b = KernelBuilder::new("hoist");
    let mut body = Block::default();
    let q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    let (m, q0) = b.measure(&mut body, q0).unwrap();
    let bit = b.discriminate(&mut body, m).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);
    // A use outside the conditional keeps the wire in the parent.
    let q1 = b.gate1(&mut body, GateKind::H, q1).unwrap();

    let mut then_blk = b.block_with_wire_args(1);
    let targ = then_blk.args[0];
    let tq = b.gate1(&mut then_blk, GateKind::X, targ).unwrap();
    b.yield_wires(&mut then_blk, &[tq]);
    let mut else_blk = b.block_with_wire_args(1);
    let earg = else_blk.args[0];
    let eq = b.gate1(&mut else_blk, GateKind::X, earg).unwrap();
    b.yield_wires(&mut else_blk, &[eq]);

    let outs = b.if_op(&mut body, bit, &[q1], then_blk, else_blk).unwrap();
    b.return_wire(&mut body, outs[0]).unwrap();
    b.ret(&mut body, &[bit]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    assert_eq!(kernel.num_qubits, Some(2));
    assert_eq!(count_ops(&kernel.body, "x"), 1);
    let (then_blk, else_blk) = find_if(&kernel);
    assert_eq!(count_ops(then_blk, "x"), 0);
    assert_eq!(count_ops(else_blk, "x"), 0);
}

/// Both branches begin by measuring the incoming wire and dropping the
/// bit: the measurement and its discriminate are hoisted out of the
/// conditional and run once unconditionally.
#[test]
fn test_branch_leading_measure_hoisted() {
    let mut b = KernelBuilder::new("measure_hoist");
    let mut body = Block::default();
    let q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    let (m, q0) = b.measure(&mut body, q0).unwrap();
    let bit = b.discriminate(&mut body, m).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);

    let mut then_blk = b.block_with_wire_args(1);
    let targ = then_blk.args[0];
    let (tm, tw) = b.measure(&mut then_blk, targ).unwrap();
    let _tbit = b.discriminate(&mut then_blk, tm).unwrap();
    let tw = b.gate1(&mut then_blk, GateKind::X, tw).unwrap();
    b.yield_wires(&mut then_blk, &[tw]);
    let mut else_blk = b.block_with_wire_args(1);
    let earg = else_blk.args[0];
    let (em, ew) = b.measure(&mut else_blk, earg).unwrap();
    let _ebit = b.discriminate(&mut else_blk, em).unwrap();
    let ew = b.gate1(&mut else_blk, GateKind::Z, ew).unwrap();
    b.yield_wires(&mut else_blk, &[ew]);

    let outs = b.if_op(&mut body, bit, &[q1], then_blk, else_blk).unwrap();
    b.return_wire(&mut body, outs[0]).unwrap();
    b.ret(&mut body, &[bit]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    assert_eq!(kernel.num_qubits, Some(2));
    // One measurement of the branch wire survives, outside the
    // conditional, with its discriminate beside it.
    assert_eq!(count_ops(&kernel.body, "mz"), 2);
    assert_eq!(count_ops(&kernel.body, "discriminate"), 2);
    let (then_blk, else_blk) = find_if(&kernel);
    assert_eq!(count_ops(then_blk, "mz"), 0);
    assert_eq!(count_ops(else_blk, "mz"), 0);
    assert_eq!(count_ops(then_blk, "discriminate"), 0);
    assert_eq!(count_ops(else_blk, "discriminate"), 0);
    // The branches keep their distinct tails.
    assert_eq!(count_ops(then_blk, "x"), 1);
    assert_eq!(count_ops(else_blk, "z"), 1);
}

/// Both branches end with the same gate on the same wire: the gate is
/// sunk below the conditional and runs once unconditionally.
#[test]
fn test_common_branch_suffix_sunk() {
    let mut b = KernelBuilder::new("sink");
    let mut body = Block::default();
    let q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    let (m, q0) = b.measure(&mut body, q0).unwrap();
    let bit = b.discriminate(&mut body, m).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);

    let mut then_blk = b.block_with_wire_args(1);
    let targ = then_blk.args[0];
    let tq = b.gate1(&mut then_blk, GateKind::Z, targ).unwrap();
    let tq = b.gate1(&mut then_blk, GateKind::X, tq).unwrap();
    b.yield_wires(&mut then_blk, &[tq]);
    let mut else_blk = b.block_with_wire_args(1);
    let earg = else_blk.args[0];
    let eq = b.gate1(&mut else_blk, GateKind::H, earg).unwrap();
    let eq = b.gate1(&mut else_blk, GateKind::X, eq).unwrap();
    b.yield_wires(&mut else_blk, &[eq]);

    let outs = b.if_op(&mut body, bit, &[q1], then_blk, else_blk).unwrap();
    b.return_wire(&mut body, outs[0]).unwrap();
    b.ret(&mut body, &[bit]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    assert_eq!(kernel.num_qubits, Some(2));
    assert_eq!(count_ops(&kernel.body, "x"), 1);
    let (then_blk, else_blk) = find_if(&kernel);
    assert_eq!(count_ops(then_blk, "x"), 0);
    assert_eq!(count_ops(else_blk, "x"), 0);
    assert_eq!(count_ops(then_blk, "z"), 1);
    assert_eq!(count_ops(else_blk, "h"), 1);
    // The sunk gate runs after the conditional.
    let names: Vec<&str> = kernel.body.ops.iter().map(|op| op.name()).collect();
    let if_pos = names.iter().position(|&n| n == "if").unwrap();
    let x_pos = names.iter().position(|&n| n == "x").unwrap();
    assert!(if_pos < x_pos, "lifted gate must follow the conditional");
}

/// Scheduling packs short independent chains as late as possible, so
/// the kernel height is the longest chain's height.
#[test]
fn test_schedule_height_is_longest_chain() {
    let mut b = KernelBuilder::new("depth");
    let mut body = Block::default();
    let mut q0 = b.borrow_wire(&mut body, WIRE_SET, 0);
    for _ in 0..3 {
        q0 = b.gate1(&mut body, GateKind::H, q0).unwrap();
    }
    let (m0, q0) = b.measure(&mut body, q0).unwrap();
    let q1 = b.borrow_wire(&mut body, WIRE_SET, 1);
    let (m1, q1) = b.measure(&mut body, q1).unwrap();
    let b0 = b.discriminate(&mut body, m0).unwrap();
    let b1 = b.discriminate(&mut body, m1).unwrap();
    b.return_wire(&mut body, q0).unwrap();
    b.return_wire(&mut body, q1).unwrap();
    b.ret(&mut body, &[b0, b1]);
    let mut kernel = b.finish(body);

    allocate_qubits(&mut kernel).unwrap();

    // Both measurements land on the final cycle, so the wires overlap
    // there even though the second chain is a single tick long.
    assert_eq!(kernel.num_qubits, Some(2));
    let names: Vec<&str> = kernel.body.ops.iter().map(|op| op.name()).collect();
    let last_h = names.iter().rposition(|&n| n == "h").unwrap();
    let first_mz = names.iter().position(|&n| n == "mz").unwrap();
    assert!(last_h < first_mz, "measurements must follow all gates");
}

#[test]
fn test_unsupported_kernels_survive_unchanged() {
    let mut b = KernelBuilder::new("alloc_style");
    let mut body = Block::default();
    let q = b.alloc_wire(&mut body);
    let (m, q) = b.measure(&mut body, q).unwrap();
    let bit = b.discriminate(&mut body, m).unwrap();
    b.return_wire(&mut body, q).unwrap();
    b.ret(&mut body, &[bit]);
    let mut kernel = b.finish(body);
    let before = format!("{kernel}");

    assert!(matches!(
        allocate_qubits(&mut kernel),
        Err(AnalysisError::NonBorrowAlloc(_))
    ));
    assert_eq!(format!("{kernel}"), before);

    let pass = QubitAllocationPass::new();
    pass.run(&mut kernel).unwrap();
    assert_eq!(format!("{kernel}"), before);
    assert_eq!(kernel.num_qubits, None);
}
