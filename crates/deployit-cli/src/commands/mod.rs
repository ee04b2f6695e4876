//! CLI command implementations.

pub mod run;

use run::RunOptions;

/// Print `<run name> <version>`. Falls back to the binary name when the run
/// definition cannot be loaded.
pub fn version(options: &RunOptions) {
    let name = run::load_config(options)
        .map(|config| config.name)
        .unwrap_or_else(|_| "deployit".to_string());
    println!("{}", version_line(&name));
}

fn version_line(name: &str) -> String {
    format!("{} {}", name, env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_line() {
        assert_eq!(
            version_line("KW Mission Builder"),
            format!("KW Mission Builder {}", env!("CARGO_PKG_VERSION"))
        );
    }
}
