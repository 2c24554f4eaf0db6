use anyhow::Result;
use std::io::{self, IsTerminal, Write};

/// Asks a yes/no question on stderr.
///
/// `assume_yes` skips the prompt. Without a terminal the default answer is
/// used; an empty reply also selects the default.
pub fn confirm(message: &str, assume_yes: bool, default_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
        tracing::debug!(default_yes, "No terminal for confirmation, using default answer");
        return Ok(default_yes);
    }

    let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
    write!(io::stderr(), "{message} {hint} ")?;
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(parse_answer(&input, default_yes))
}

fn parse_answer(input: &str, default_yes: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answer_uses_default() {
        assert!(parse_answer("\n", true));
        assert!(!parse_answer("\n", false));
    }

    #[test]
    fn explicit_answers() {
        assert!(parse_answer("Y\n", false));
        assert!(parse_answer("yes", false));
        assert!(!parse_answer("n", true));
        assert!(!parse_answer("whatever", true));
    }

    #[test]
    fn assume_yes_skips_prompt() {
        assert!(confirm("Proceed?", true, false).unwrap());
    }
}
