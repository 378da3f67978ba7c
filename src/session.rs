use std::io::{self, BufRead, Write};

use crate::backend::ModelCapability;
use crate::engine::{ChatEngine, ChatRequest};

pub const INPUT_PROMPT: &str = "Ask AutoButler something...";
pub const EXIT_COMMAND: &str = "exit";
pub const FAREWELL: &str = "It was a joy serving you. :)";

/// Reads one line per turn until EOF or `exit` (any case) and writes the
/// engine's reply for each.
pub fn run_session<M, R, W>(engine: &mut ChatEngine<M>, mut input: R, mut output: W) -> io::Result<()>
where
    M: ModelCapability,
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "{}", INPUT_PROMPT)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }

        let query = line.trim();
        if query.eq_ignore_ascii_case(EXIT_COMMAND) {
            break;
        }

        let response = engine.chat(&ChatRequest::new(query));
        writeln!(output, "{}", response)?;
    }

    writeln!(output, "{}", FAREWELL)?;
    output.flush()
}
