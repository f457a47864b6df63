/*!
  `ozdasm` disassembles compiled Oz pickle (`*.ozf`) images: it deserializes the
  pickled term graph, finds every code area reachable from the root, and prints each
  one as an assembly listing (or, with `--list`, a summary table).
*/

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;
extern crate strum;
#[macro_use]
extern crate strum_macros;

mod bytecode;
mod disasm;
mod error;
mod ozify;
mod pickle;
mod term;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Disassemble compiled *.ozf pickle images", version)]
struct Args {
  /// Keep only procedures with this name
  #[arg(short, long)]
  filter: Option<String>,

  /// Print a procedure summary table instead of full listings
  #[arg(short, long)]
  list: bool,

  /// The file to disassemble
  ozf: PathBuf,
}

fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  let data = fs::read(&args.ozf)
    .with_context(|| format!("could not read {}", args.ozf.display()))?;
  let graph = pickle::parse(&data)
    .with_context(|| format!("{} is not a well-formed pickle", args.ozf.display()))?;

  let stdout = io::stdout();
  let mut out = stdout.lock();
  if args.list {
    disasm::list_code_areas(&mut out, &graph)?;
  } else {
    disasm::disassemble(&mut out, &graph, args.filter.as_deref())?;
  }
  out.flush()?;

  Ok(())
}
