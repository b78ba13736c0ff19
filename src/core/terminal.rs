use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "       _                              _   ",
        "__   _(_) ___  __ _  __ _  ___ _ __ | |_ ",
        "\\ \\ / / |/ _ \\/ _` |/ _` |/ _ \\ '_ \\| __|",
        " \\ V /| |  __/ (_| | (_| |  __/ | | | |_ ",
        "  \\_/ |_|\\___|\\__,_|\\__, |\\___|_| |_|\\__|",
        "                    |___/                ",
    ];

    // Horizontal gradient #34d399 -> #22d3ee -> #818cf8
    let stops: [(u8, u8, u8); 3] = [(52, 211, 153), (34, 211, 238), (129, 140, 248)];
    let max_w = lines.iter().map(|l| l.len()).max().unwrap_or(1) as u32;

    println!();
    for line in lines {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = (x as u32 * 1000 / max_w).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mYour keys, your agents.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Info(String),
    Warn(String),
    Success(String),
    Hint(String, String),
    Blank,
}

/// A titled block of terminal output, built up and printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Info(text.to_string()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Warn(text.to_string()));
        self
    }

    pub fn success(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Success(text.to_string()));
        self
    }

    /// An example invocation, with an optional trailing note.
    pub fn hint(mut self, example: &str, note: &str) -> Self {
        self.lines
            .push(GuideLine::Hint(example.to_string(), note.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn render(&self) -> Vec<String> {
        let width = self
            .lines
            .iter()
            .filter_map(|l| match l {
                GuideLine::Command(name, _) => Some(name.len()),
                GuideLine::Status(label, _) => Some(label.len() + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = vec![format!("{}", style(&self.title).bold().underlined())];
        for line in &self.lines {
            out.push(match line {
                GuideLine::Command(name, desc) => format!(
                    "  {}  {}",
                    style(format!("{:<width$}", name, width = width)).cyan().bold(),
                    desc
                ),
                GuideLine::Status(label, value) => format!(
                    "  {}  {}",
                    style(format!("{:<width$}", format!("{}:", label), width = width)).bold(),
                    value
                ),
                GuideLine::Text(text) => format!("  {}", text),
                GuideLine::Info(text) => format!("  {} {}", style("→").cyan(), text),
                GuideLine::Warn(text) => format!("  {} {}", style("!").yellow().bold(), text),
                GuideLine::Success(text) => format!("  {} {}", style("✓").green().bold(), text),
                GuideLine::Hint(example, note) if note.is_empty() => {
                    format!("  {} {}", style("$").dim(), style(example).cyan())
                }
                GuideLine::Hint(example, note) => format!(
                    "  {} {}  {}",
                    style("$").dim(),
                    style(example).cyan(),
                    style(note).dim()
                ),
                GuideLine::Blank => String::new(),
            });
        }
        out
    }

    pub fn print(self) {
        println!();
        for line in self.render() {
            println!("{}", line);
        }
    }
}
