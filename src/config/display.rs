//! Colorized configuration summary, printed by `--test-config`. Same
//! box-drawing, ANSI-colored dashboard style used elsewhere in this
//! codebase, re-pointed at `ResolvedConfig`'s listener/refork fields
//! instead of routing tables.

use std::fmt;

use crate::config::ResolvedConfig;

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mWorkers:\x1b[0m      \x1b[32m{}\x1b[0m",
            self.worker_processes
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mTimeout:\x1b[0m      \x1b[33m{}s\x1b[0m",
            self.timeout.as_secs()
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRefork after:\x1b[0m \x1b[36m{:?}\x1b[0m",
            self.refork_after
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m   \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDocument root:\x1b[0m \x1b[32m{}\x1b[0m",
            self.document_root.display()
        )?;

        writeln!(f, "\n  \x1b[1;37m📋 LISTENERS ({})\x1b[0m", self.listeners.len())?;
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;
        for (idx, listener) in self.listeners.iter().enumerate() {
            let is_last = idx == self.listeners.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(
                f,
                "  \x1b[38;5;244m{}\x1b[0m \x1b[1;37m{}\x1b[0m \x1b[38;5;250mbacklog={} reuseport={}\x1b[0m",
                branch,
                listener.address.canonical(),
                listener.options.backlog,
                listener.options.reuseport
            )?;
        }
        Ok(())
    }
}

pub fn display_config(config: &ResolvedConfig) {
    println!("\n\x1b[1;35m 🌐 REFORKD CONFIGURATION\x1b[0m");
    println!("\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    print!("{config}");
    println!("\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    println!(" \x1b[1;32m✔\x1b[0m Configuration is valid.\n");
}
