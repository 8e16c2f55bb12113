use super::*;
use p4vm::Instruction;

fn sample_image() -> Image {
    Image {
        instructions: vec![
            Instruction { op: 1, p: 0, q: 3 },
            Instruction { op: 62, p: 0, q: -1 },
        ],
        ints: vec![42, -7],
        reals: vec![(3.5f64).to_bits()],
        sets: vec![0b1010],
        bounds: vec![(1, 5)],
        strings: vec![[0u8; 16]],
    }
}

#[test]
fn write_read_round_trips() {
    let path = "test.p4i";
    let image = sample_image();

    write_file(path, &image).unwrap();
    let read_back = read_file(path).unwrap();
    std::fs::remove_file(path).unwrap();

    assert_eq!(image, read_back);
}

#[test]
fn into_runtime_places_instructions_at_begincode() {
    let image = sample_image();
    let (code, _store) = image.into_runtime();

    assert_eq!(code.fetch(p4vm::constants::BEGINCODE).op, 1);
    assert_eq!(code.fetch(p4vm::constants::BEGINCODE + 1).op, 62);
}

#[test]
fn from_assembled_round_trips_through_p4asm() {
    let assembled = p4asm::assemble(" stp\n q\n").unwrap();
    let image = Image::from_assembled(&assembled);

    assert_eq!(image.instructions.len(), 1);
    assert_eq!(image.instructions[0].op, p4vm::Opcode::Stp as u8);
}
