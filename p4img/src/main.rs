//! CLI driver for `p4img`, matching spec §6's `run SOURCE.p4` command and
//! the teacher's `vex` binary's dual-input shape: a plain positional
//! argument names textual P-code to assemble and run; `-i`/`--image`
//! switches to loading an already-assembled `.p4i` binary image instead.

#[macro_use]
extern crate clap;

use clap::{Arg, ArgGroup};
use p4vm::ExitCode;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Run(p4img::run::Error),
    Io(io::Error, IOErrorContext, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => write!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "reading input",
                    IOErrorContext::WriteOutput => "writing output",
                },
                path.display(),
                err
            ),
            Error::Run(err) => write!(f, "{}", err),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("SOURCE")
                .help("Textual P-code file to assemble and run")
                .index(1),
        )
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .value_name("IMAGE")
                .help("Sets a pre-assembled .p4i image file to run instead"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the file execution output is written to (default: SOURCE.p4)"),
        )
        .group(
            ArgGroup::with_name("input")
                .args(&["SOURCE", "image"])
                .required(true),
        )
        .get_matches();

    let result = match (matches.value_of("SOURCE"), matches.value_of("image")) {
        (Some(source), _) => run_source(source, matches.value_of("output")),
        (None, Some(image)) => run_image(image, matches.value_of("output")),
        (None, None) => unreachable!("clap enforces the input group"),
    };

    match result {
        Ok(ExitCode::Halted) => {}
        Ok(other) => {
            println!("ERROR op: {:?}", other);
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

fn run_source(path: &str, output: Option<&str>) -> Result<ExitCode, Error> {
    let input_path = Path::new(path);
    let source = fs::read_to_string(input_path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;

    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.p4", path)));

    let mut out_buf = Vec::new();
    let code = p4img::run::run_source(&source, BufReader::new(io::stdin()), &mut out_buf)
        .map_err(Error::Run)?;

    fs::write(&output_path, &out_buf)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path))?;
    Ok(code)
}

fn run_image(path: &str, output: Option<&str>) -> Result<ExitCode, Error> {
    let input_path = Path::new(path);
    let image = p4img::read_file(input_path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;

    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("run.p4"));

    let mut out_buf = Vec::new();
    let code = p4img::run::run_image(image, BufReader::new(io::stdin()), &mut out_buf)
        .map_err(Error::Run)?;

    fs::write(&output_path, &out_buf)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path))?;
    Ok(code)
}
