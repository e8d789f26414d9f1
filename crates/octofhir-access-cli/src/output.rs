use colored::Colorize;
use serde_json::Value;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_granted(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}

pub fn print_denied(msg: &str) {
    eprintln!("{} {}", "✗".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
