//! Binary image format for assembled P4 programs: the packed instruction
//! slots an assembler pass actually wrote, plus the five interned
//! constant pools they index into, so a program can be assembled once and
//! run many times without re-parsing its textual P-code.
//!
//! Serialized with [`byteorder`] rather than `serde`/`bincode`, matching
//! the teacher's own binary-format crate's choice (its `TODO` on that
//! point is preserved here: a future pass could move to a self-describing
//! format).

use byteorder::{LittleEndian as Endian, ReadBytesExt, WriteBytesExt};
use p4vm::constants::BEGINCODE;
use p4vm::store::Pool;
use p4vm::{Code, Instruction, PSet, Store};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub mod run;

#[cfg(test)]
mod test;

/// An assembled program ready to load into a [`p4vm::Machine`]: the
/// instruction slots written by the assembler (`[BEGINCODE, end_pc)`)
/// and the five pools its `ldc`/`lca`/`chk` instructions index into.
#[derive(Debug, PartialEq)]
pub struct Image {
    pub instructions: Vec<Instruction>,
    pub ints: Vec<i32>,
    pub reals: Vec<u64>,
    pub sets: Vec<u64>,
    pub bounds: Vec<(i32, i32)>,
    pub strings: Vec<[u8; 16]>,
}

impl Image {
    pub fn from_assembled(assembled: &p4asm::Assembled) -> Image {
        let instructions = (BEGINCODE..assembled.end_pc)
            .map(|pc| assembled.code.fetch(pc))
            .collect();
        Image {
            instructions,
            ints: assembled.store.ints.entries().to_vec(),
            reals: assembled.store.reals.entries().to_vec(),
            sets: assembled.store.sets.entries().iter().map(|s| s.raw()).collect(),
            bounds: assembled.store.bounds.entries().to_vec(),
            strings: assembled.store.strings.entries().to_vec(),
        }
    }

    /// Rebuilds a fresh `p4vm::Code` + `p4vm::Store` pair sized for
    /// `p4vm::Machine`, with the image's instructions placed back at
    /// [`BEGINCODE`] and its pools restored verbatim (no re-interning, no
    /// dedup rescan: the image already reflects a dedup'd pool).
    pub fn into_runtime(self) -> (Code, Store) {
        let mut code = Code::new();
        for (i, instr) in self.instructions.into_iter().enumerate() {
            code.store(BEGINCODE + i, instr);
        }

        let mut store = Store::new();
        store.ints = Pool::from_entries(self.ints);
        store.reals = Pool::from_entries(self.reals);
        store.sets = Pool::from_entries(self.sets.into_iter().map(PSet::from_raw).collect());
        store.bounds = Pool::from_entries(self.bounds);
        store.strings = Pool::from_entries(self.strings);

        (code, store)
    }
}

fn read<R: Read>(reader: &mut R) -> std::io::Result<Image> {
    let instr_count = reader.read_u32::<Endian>()? as usize;
    let mut instructions = Vec::with_capacity(instr_count);
    for _ in 0..instr_count {
        let op = reader.read_u8()?;
        let p = reader.read_u8()?;
        let q = reader.read_i32::<Endian>()?;
        instructions.push(Instruction { op, p, q });
    }

    let ints = read_pool(reader, |r| r.read_i32::<Endian>())?;
    let reals = read_pool(reader, |r| r.read_u64::<Endian>())?;
    let sets = read_pool(reader, |r| r.read_u64::<Endian>())?;
    let bounds = read_pool(reader, |r| Ok((r.read_i32::<Endian>()?, r.read_i32::<Endian>()?)))?;
    let strings = read_pool(reader, |r| {
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf)?;
        Ok(buf)
    })?;

    Ok(Image { instructions, ints, reals, sets, bounds, strings })
}

fn read_pool<R: Read, T>(
    reader: &mut R,
    mut read_one: impl FnMut(&mut R) -> std::io::Result<T>,
) -> std::io::Result<Vec<T>> {
    let count = reader.read_u32::<Endian>()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_one(reader)?);
    }
    Ok(entries)
}

fn write<W: Write>(writer: &mut W, image: &Image) -> std::io::Result<()> {
    writer.write_u32::<Endian>(image.instructions.len() as u32)?;
    for instr in &image.instructions {
        writer.write_u8(instr.op)?;
        writer.write_u8(instr.p)?;
        writer.write_i32::<Endian>(instr.q)?;
    }

    write_pool(writer, &image.ints, |w, v| w.write_i32::<Endian>(*v))?;
    write_pool(writer, &image.reals, |w, v| w.write_u64::<Endian>(*v))?;
    write_pool(writer, &image.sets, |w, v| w.write_u64::<Endian>(*v))?;
    write_pool(writer, &image.bounds, |w, (lb, ub)| {
        w.write_i32::<Endian>(*lb)?;
        w.write_i32::<Endian>(*ub)
    })?;
    write_pool(writer, &image.strings, |w, v| w.write_all(v))?;
    Ok(())
}

fn write_pool<W: Write, T>(
    writer: &mut W,
    entries: &[T],
    mut write_one: impl FnMut(&mut W, &T) -> std::io::Result<()>,
) -> std::io::Result<()> {
    writer.write_u32::<Endian>(entries.len() as u32)?;
    for entry in entries {
        write_one(writer, entry)?;
    }
    Ok(())
}

pub trait ReadImgExt: Read + Sized {
    fn read_img(&mut self) -> std::io::Result<Image> {
        read(self)
    }
}

impl<R: Read + Sized> ReadImgExt for R {}

pub trait WriteImgExt: Write + Sized {
    fn write_img(&mut self, image: &Image) -> std::io::Result<()> {
        write(self, image)
    }
}

impl<W: Write + Sized> WriteImgExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> std::io::Result<Image> {
    BufReader::new(File::open(path)?).read_img()
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &Image) -> std::io::Result<()> {
    BufWriter::new(File::create(path)?).write_img(image)
}
