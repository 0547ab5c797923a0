use owo_colors::{AnsiColors, DynColors, Style, XtermColors};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::app::AppSet;
use crate::error::ConfigError;

pub const OFF: &str = "off";
pub const AUTO: &str = "auto";

/// Colors handed out to applications declaring `color = "auto"`.
const AUTO_PALETTE: &[&str] = &[
	"cyan", "green", "yellow", "blue", "magenta", "red", "cyan+h", "green+h", "yellow+h", "blue+h",
	"magenta+h", "red+h",
];

pub fn auto_color(index: usize) -> &'static str {
	AUTO_PALETTE[index % AUTO_PALETTE.len()]
}

/// The token is not a color this parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownColor;

/// Parses `fg[+attrs][:bg[+attrs]]`. `off` and the empty token mean no color.
///
/// Colors are the eight ANSI names, `default`, or an xterm index. Attributes:
/// `b` bold, `B` blink, `u` underline, `i` inverse, `h` bright.
pub fn parse(token: &str) -> Result<Option<Style>, UnknownColor> {
	let token = token.trim();
	if token.is_empty() || token == OFF {
		return Ok(None);
	}

	let (fg, bg) = match token.split_once(':') {
		Some((fg, bg)) => (fg, Some(bg)),
		None => (token, None),
	};

	let mut style = Style::new();
	let (fg_name, fg_attrs) = split_attrs(fg);
	for attr in fg_attrs.chars() {
		style = match attr {
			'b' => style.bold(),
			'B' => style.blink(),
			'u' => style.underline(),
			'i' => style.reversed(),
			'h' => style,
			_ => return Err(UnknownColor),
		};
	}
	if !fg_name.is_empty() {
		style = style.color(color(fg_name, fg_attrs.contains('h'))?);
	}

	if let Some(bg) = bg {
		let (bg_name, bg_attrs) = split_attrs(bg);
		if bg_attrs.chars().any(|c| c != 'h') {
			return Err(UnknownColor);
		}
		if !bg_name.is_empty() {
			style = style.on_color(color(bg_name, bg_attrs.contains('h'))?);
		}
	}

	Ok(Some(style))
}

fn split_attrs(part: &str) -> (&str, &str) {
	part.split_once('+').unwrap_or((part, ""))
}

fn color(name: &str, bright: bool) -> Result<DynColors, UnknownColor> {
	if let Ok(n) = name.parse::<u8>() {
		return Ok(DynColors::Xterm(XtermColors::from(n)));
	}
	let ansi = match (name, bright) {
		("black", false) => AnsiColors::Black,
		("red", false) => AnsiColors::Red,
		("green", false) => AnsiColors::Green,
		("yellow", false) => AnsiColors::Yellow,
		("blue", false) => AnsiColors::Blue,
		("magenta", false) => AnsiColors::Magenta,
		("cyan", false) => AnsiColors::Cyan,
		("white", false) => AnsiColors::White,
		("black", true) => AnsiColors::BrightBlack,
		("red", true) => AnsiColors::BrightRed,
		("green", true) => AnsiColors::BrightGreen,
		("yellow", true) => AnsiColors::BrightYellow,
		("blue", true) => AnsiColors::BrightBlue,
		("magenta", true) => AnsiColors::BrightMagenta,
		("cyan", true) => AnsiColors::BrightCyan,
		("white", true) => AnsiColors::BrightWhite,
		("default", _) => AnsiColors::Default,
		_ => return Err(UnknownColor),
	};
	Ok(DynColors::Ansi(ansi))
}

/// Renders `text` with `style`, or leaves it untouched.
pub fn paint(style: Option<&Style>, text: &str) -> String {
	match style {
		Some(style) => style.style(text).to_string(),
		None => text.to_string(),
	}
}

/// A content pattern that overrides the declared color of matching lines.
#[derive(Debug, Clone)]
struct Pattern {
	style: Option<Style>,
	regex: Regex,
}

/// Color per application id plus the pattern overrides.
///
/// Patterns are tried in the order of the `[patterns]` table keys. When two
/// of them match the same line the earlier key wins; overlapping patterns are
/// a configuration hazard rather than something to rely on.
#[derive(Debug, Clone, Default)]
pub struct Palette {
	declared: HashMap<String, Option<Style>>,
	patterns: Vec<Pattern>,
}

impl Palette {
	pub fn new(apps: &AppSet, patterns: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
		let mut declared = HashMap::with_capacity(apps.len());
		for app in apps.iter() {
			let style = parse(&app.color).map_err(|_| ConfigError::InvalidColor {
				id: app.id.clone(),
				token: app.color.clone(),
			})?;
			declared.insert(app.id.clone(), style);
		}

		let mut compiled = Vec::with_capacity(patterns.len());
		for (token, pattern) in patterns {
			let style = parse(token).map_err(|_| ConfigError::InvalidColor {
				id: "patterns".into(),
				token: token.clone(),
			})?;
			let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
				color: token.clone(),
				source,
			})?;
			compiled.push(Pattern { style, regex });
		}

		Ok(Self {
			declared,
			patterns: compiled,
		})
	}

	pub fn declared(&self, id: &str) -> Option<&Style> {
		self.declared.get(id).and_then(|s| s.as_ref())
	}

	/// Pattern color for `line` if one matches, else the declared color of `id`.
	pub fn style_for(&self, id: &str, line: &str) -> Option<&Style> {
		match self.patterns.iter().find(|p| p.regex.is_match(line)) {
			Some(pattern) => pattern.style.as_ref(),
			None => self.declared(id),
		}
	}
}
