//! Runner entry points mirroring the teacher's `vex::run_vexfile`/
//! `vex::run_vasm` split: one path for a program already assembled to an
//! [`Image`](crate::Image), one for raw textual P-code assembled on the fly.

use crate::Image;
use p4vm::{ExitCode, Machine};
use std::fmt;
use std::io::{self, BufRead, Write};

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Assemble(p4asm::Error),
    Vm(p4vm::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<p4asm::Error> for Error {
    fn from(err: p4asm::Error) -> Error {
        Error::Assemble(err)
    }
}

impl From<p4vm::Error> for Error {
    fn from(err: p4vm::Error) -> Error {
        Error::Vm(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Assemble(err) => write!(f, "assembling image failed: {}", err),
            Error::Vm(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}

/// Assembles `source` (textual P-code, spec §4.5) and runs it to
/// completion.
pub fn run_source<R: BufRead, W: Write>(
    source: &str,
    input: R,
    output: W,
) -> Result<ExitCode, Error> {
    let assembled = p4asm::assemble(source)?;
    run_assembled(&assembled, input, output)
}

/// Runs an already-assembled program without re-parsing its P-code.
pub fn run_assembled<R: BufRead, W: Write>(
    assembled: &p4asm::Assembled,
    input: R,
    output: W,
) -> Result<ExitCode, Error> {
    run_image(Image::from_assembled(assembled), input, output)
}

/// Runs a program loaded from a `.p4i` image file.
pub fn run_image<R: BufRead, W: Write>(
    image: Image,
    input: R,
    output: W,
) -> Result<ExitCode, Error> {
    let (code, store) = image.into_runtime();
    let mut machine = Machine::new(code, store, input, output);
    log::debug!("running image");
    Ok(machine.run()?)
}
