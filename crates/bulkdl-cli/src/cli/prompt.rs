//! Interactive fallback: ask for count and concurrency on stdin.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

/// Print `question` and read one non-negative integer from `input`.
pub fn ask_usize(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> Result<usize> {
    writeln!(output, "{}", question)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("read answer")?;
    line.trim()
        .parse::<usize>()
        .with_context(|| format!("expected a non-negative integer, got {:?}", line.trim()))
}

/// Ask for the number of units and the parallel download limit.
pub fn ask_count_and_concurrency() -> Result<(usize, usize)> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let count = ask_usize(&mut input, &mut output, "Enter the number of items to download:")?;
    let max = ask_usize(&mut input, &mut output, "Enter the maximum parallel download limit:")?;
    Ok((count, max))
}
