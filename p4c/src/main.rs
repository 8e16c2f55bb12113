//! CLI driver for `p4c`, matching spec §6's `compile SOURCE OUT.p4`
//! command: reads Pascal source (or stdin when `SOURCE` is `stdin`),
//! writes the emitted textual P-code to `OUT.p4`, and exits 1 if any
//! diagnostic was raised.

#[macro_use]
extern crate clap;

use clap::Arg;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("SOURCE")
                .help("Pascal source file to compile, or \"stdin\" to read from standard input")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("OUT")
                .help("Textual P-code output file")
                .required(true)
                .index(2),
        )
        .get_matches();

    let source_arg = matches.value_of("SOURCE").unwrap();
    let out_path = PathBuf::from(matches.value_of("OUT").unwrap());

    let source = match source_arg {
        "stdin" => {
            let mut buf = String::new();
            if let Err(err) = io::stdin().read_to_string(&mut buf) {
                eprintln!("reading stdin failed: {}", err);
                std::process::exit(1);
            }
            buf
        }
        path => match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("reading file \"{}\" failed: {}", path, err);
                std::process::exit(1);
            }
        },
    };

    let (code, diagnostics) = p4c::compile(&source);

    if let Err(err) = fs::write(&out_path, code) {
        eprintln!("writing file \"{}\" failed: {}", out_path.display(), err);
        std::process::exit(1);
    }

    if diagnostics.is_empty() {
        return;
    }

    for diag in &diagnostics {
        println!("{}", diag);
    }
    std::process::exit(1);
}
