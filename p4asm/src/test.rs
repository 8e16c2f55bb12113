//! Integration tests exercising [`crate::assemble`] end to end: a full
//! textual program in, packed code words and pool contents out.

use crate::assemble;

#[test]
fn adds_two_literals() {
    let source = " ldci 1\n ldci 2\n adi\n stp\nq\n";
    let assembled = assemble(source).unwrap();

    let begin = p4vm::constants::BEGINCODE;
    assert_eq!(assembled.code.fetch(begin).op, p4vm::Opcode::Ldc as u8);
    assert_eq!(assembled.code.fetch(begin + 2).op, p4vm::Opcode::Adi as u8);
    assert_eq!(assembled.code.fetch(begin + 3).op, p4vm::Opcode::Stp as u8);
}

#[test]
fn backward_label_resolves_to_defining_slot() {
    // l1 marks the slot the ujp jumps back to.
    let source = "l1\n ldci 0\n ujp l1\nq\n";
    let assembled = assemble(source).unwrap();

    let begin = p4vm::constants::BEGINCODE;
    let ujp = assembled.code.fetch(begin + 1);
    assert_eq!(ujp.op, p4vm::Opcode::Ujp as u8);
    assert_eq!(ujp.q, begin as i32);
}

#[test]
fn forward_label_resolves_once_defined() {
    // the ujp targets l1, defined two instructions later.
    let source = " ujp l1\n ldci 0\nl1\n stp\nq\n";
    let assembled = assemble(source).unwrap();

    let begin = p4vm::constants::BEGINCODE;
    let ujp = assembled.code.fetch(begin);
    assert_eq!(ujp.op, p4vm::Opcode::Ujp as u8);
    assert_eq!(ujp.q, (begin + 2) as i32);
}

#[test]
fn equated_label_takes_explicit_value() {
    let source = "l5=100\n ujp l5\nq\n";
    let assembled = assemble(source).unwrap();

    let begin = p4vm::constants::BEGINCODE;
    assert_eq!(assembled.code.fetch(begin).q, 100);
}

#[test]
fn dangling_label_is_an_error() {
    let source = " ujp l9\nq\n";
    assert!(assemble(source).is_err());
}

#[test]
fn small_int_literal_packs_directly_without_interning() {
    let source = " ldci 3\nq\n";
    let assembled = assemble(source).unwrap();

    assert_eq!(assembled.store.ints.len(), 0);
    let begin = p4vm::constants::BEGINCODE;
    assert_eq!(assembled.code.fetch(begin).q, 3);
}

#[test]
fn large_int_literal_interns_and_switches_opcode() {
    let large = p4vm::constants::LARGEINT + 1;
    let source = format!(" ldci {}\nq\n", large);
    let assembled = assemble(&source).unwrap();

    assert_eq!(assembled.store.ints.len(), 1);
    assert_eq!(assembled.store.ints.get(0), Some(large as i32));
    let begin = p4vm::constants::BEGINCODE;
    assert_eq!(assembled.code.fetch(begin).op, p4vm::Opcode::Lci as u8);
}

#[test]
fn repeated_constant_is_interned_once() {
    let large = p4vm::constants::LARGEINT + 1;
    let source = format!(" ldci {}\n ldci {}\nq\n", large, large);
    let assembled = assemble(&source).unwrap();

    assert_eq!(assembled.store.ints.len(), 1);
}

#[test]
fn set_literal_assembles_to_a_pool_entry() {
    let source = " ldcs (1,3,5)\nq\n";
    let assembled = assemble(source).unwrap();

    assert_eq!(assembled.store.sets.len(), 1);
    assert_eq!(assembled.store.sets.get(0).unwrap().expand(), vec![1, 3, 5]);
}

#[test]
fn second_pass_is_idempotent_on_code_words() {
    // spec's open question: does rerunning pass 2 on the same label table
    // change any code word it already resolved? It should not.
    let source = " ujp l1\nl1\n ldci 0\n ujp l1\nq\n";
    let first = assemble(source).unwrap();
    let second = assemble(source).unwrap();

    let begin = p4vm::constants::BEGINCODE;
    for offset in 0..(first.end_pc - begin) {
        let a = first.code.fetch(begin + offset);
        let b = second.code.fetch(begin + offset);
        assert_eq!(a.op, b.op);
        assert_eq!(a.p, b.p);
        assert_eq!(a.q, b.q);
    }
}
