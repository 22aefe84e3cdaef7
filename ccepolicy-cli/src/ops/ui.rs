//! Terminal output helpers for reports.

use ccepolicy_core::fragments::FragmentDecision;
use ccepolicy_core::Violations;
use crossterm::style::Stylize;

/// Calculate display width of a string (accounting for wide chars like emoji).
fn display_width(s: &str) -> usize {
    s.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

/// Print a section header with box drawing characters.
pub fn print_header(title: &str) {
    let inner_width: usize = 58;
    let total_padding = inner_width.saturating_sub(display_width(title));
    let left_pad = total_padding / 2;
    let right_pad = total_padding - left_pad;

    println!();
    println!("{}", format!("╔{}╗", "═".repeat(inner_width)).dark_cyan());
    println!(
        "{}",
        format!("║{}{}{}║", " ".repeat(left_pad), title, " ".repeat(right_pad)).dark_cyan()
    );
    println!("{}", format!("╚{}╝", "═".repeat(inner_width)).dark_cyan());
    println!();
}

/// Print a small section title.
pub fn print_section(title: &str) {
    println!();
    println!("  {} {}", "▸".dark_cyan(), title.white().bold());
    println!("  {}", "─".repeat(50).dark_grey());
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Errors go to stderr so policy output on stdout stays clean.
pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

pub fn print_kv(key: &str, value: &str) {
    println!("  {:<14} {}", format!("{}:", key).dark_grey(), value);
}

pub fn print_hint(msg: &str) {
    println!("  {} {}", "💡".yellow(), msg.dark_grey());
}

/// One line per reason, grouped by container id then field.
pub fn print_violations(violations: &Violations) {
    for (id, fields) in violations {
        print_section(id);
        for (field, reasons) in fields {
            for reason in reasons {
                println!("  {} {} {}", "✗".red(), format!("[{field}]").dark_grey(), reason);
            }
        }
    }
}

pub fn print_decision(decision: &FragmentDecision) {
    match decision {
        FragmentDecision::Accepted { feed, svn } => {
            print_success(&format!("{feed} (svn {svn}) accepted"))
        }
        FragmentDecision::Untrusted { feed } => {
            print_warning(&format!("{feed} is not imported, ignored"))
        }
        FragmentDecision::TooOld {
            feed,
            svn,
            minimum_svn,
        } => print_warning(&format!(
            "{feed} svn {svn} is below minimum {minimum_svn}, containers stay inline"
        )),
        FragmentDecision::MissingSvn { feed } => {
            print_warning(&format!("{feed} declares no svn, ignored"))
        }
        FragmentDecision::Unavailable { source, reason } => {
            print_warning(&format!("{source} unavailable: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::display_width;

    #[test]
    fn wide_chars_take_two_cells() {
        assert_eq!(display_width("policy"), 6);
        assert_eq!(display_width("策略"), 4);
    }
}
