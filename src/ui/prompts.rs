// Interactive confirmation and one-line status messages

use colored::Colorize;
use std::io::{self, BufRead, Write};

fn parse_answer(input: &str, default: bool) -> bool {
    match input.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

/// Ask a yes/no question. An empty answer takes `default`; a closed stdin
/// (piped or detached runs) always declines.
pub fn confirm(question: &str, default: bool) -> io::Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    print!("{} {} ", question.white().bold(), hint.dimmed());
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input)? == 0 {
        println!();
        return Ok(false);
    }
    Ok(parse_answer(&input, default))
}

pub fn warn(message: &str) {
    println!("{} {}", "!".yellow().bold(), message.yellow());
}

pub fn info(message: &str) {
    println!("{}", message.cyan());
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Secondary detail under a result line.
pub fn dimmed(message: &str) {
    println!("  {}", message.dimmed());
}
