//! Neon ASCII banner with a vertical gradient (TW-DAYTRADE).

use crossterm::ExecutableCommand;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use figlet_rs::FIGfont;
use std::io::{Write, stdout};

const BANNER_TEXT: &str = "TW-DAYTRADE";

/// Market red (#ff3b3b), the colour of a rising tick on TWSE boards.
const TICK_RED: (u8, u8, u8) = (0xff, 0x3b, 0x3b);
/// Cyber Green (#0ff0fc).
const CYBER_GREEN: (u8, u8, u8) = (0x0f, 0xf0, 0xfc);

/// Linear interpolation between two RGB colors. `t` in [0.0, 1.0].
fn lerp_rgb(a: (u8, u8, u8), b: (u8, u8, u8), t: f64) -> (u8, u8, u8) {
    let r = (f64::from(a.0) * (1.0 - t) + f64::from(b.0) * t).round() as u8;
    let g = (f64::from(a.1) * (1.0 - t) + f64::from(b.1) * t).round() as u8;
    let bl = (f64::from(a.2) * (1.0 - t) + f64::from(b.2) * t).round() as u8;
    (r, g, bl)
}

/// Banner art in the built-in figlet font; plain text if rendering fails.
fn banner_art() -> String {
    FIGfont::standard()
        .ok()
        .and_then(|font| font.convert(BANNER_TEXT).map(|figure| figure.to_string()))
        .unwrap_or_else(|| format!("{}\n", BANNER_TEXT))
}

/// Prints the welcome banner, then version and a short disclaimer.
pub fn print_welcome() {
    let mut out = stdout();
    let art = banner_art();
    let lines: Vec<&str> = art.lines().collect();
    let total = lines.len().max(1);

    for (i, line) in lines.iter().enumerate() {
        let t = if total <= 1 {
            1.0
        } else {
            i as f64 / (total - 1) as f64
        };
        let (r, g, b) = lerp_rgb(TICK_RED, CYBER_GREEN, t);
        let _ = out.execute(SetForegroundColor(Color::Rgb { r, g, b }));
        let _ = out.execute(Print(line));
        let _ = out.execute(Print("\r\n"));
        let _ = out.execute(ResetColor);
    }

    let _ = out.execute(SetForegroundColor(Color::Rgb {
        r: CYBER_GREEN.0,
        g: CYBER_GREEN.1,
        b: CYBER_GREEN.2,
    }));
    let _ = out.execute(Print(format!("v{}\r\n", env!("CARGO_PKG_VERSION"))));
    let _ = out.execute(Print("台股當沖分析 | 僅供參考，不構成投資建議\r\n"));
    let _ = out.execute(ResetColor);
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints() {
        assert_eq!(lerp_rgb(TICK_RED, CYBER_GREEN, 0.0), TICK_RED);
        assert_eq!(lerp_rgb(TICK_RED, CYBER_GREEN, 1.0), CYBER_GREEN);
    }

    #[test]
    fn test_banner_art_is_multiline() {
        assert!(banner_art().lines().count() > 1);
    }
}
