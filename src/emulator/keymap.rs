//! Named key lookup for scancode injection.
//!
//! Make codes are scancode set 1. Extended keys carry the `0xE0` prefix in
//! the high byte; the break code sets bit 7 of the low byte.

/// Make sequence for the Enter key; typing `'\n'` injects this.
pub const ENTER_MAKE: &[u16] = &[0x1C];

/// Make sequence for a named key. Names are case-insensitive and common
/// aliases are accepted. Unknown names return `None`.
pub fn scancodes_for(name: &str) -> Option<&'static [u16]> {
    let key = name.trim().to_ascii_lowercase();
    let codes: &'static [u16] = match key.as_str() {
        "escape" | "esc" => &[0x01],
        "backspace" => &[0x0E],
        "tab" => &[0x0F],
        "enter" | "return" => ENTER_MAKE,
        "ctrl" | "control" => &[0x1D],
        "shift" => &[0x2A],
        "alt" => &[0x38],
        "space" | "spacebar" => &[0x39],
        "capslock" => &[0x3A],
        "f1" => &[0x3B],
        "f2" => &[0x3C],
        "f3" => &[0x3D],
        "f4" => &[0x3E],
        "f5" => &[0x3F],
        "f6" => &[0x40],
        "f7" => &[0x41],
        "f8" => &[0x42],
        "f9" => &[0x43],
        "f10" => &[0x44],
        "home" => &[0xE047],
        "up" | "arrowup" => &[0xE048],
        "pageup" | "pgup" => &[0xE049],
        "left" | "arrowleft" => &[0xE04B],
        "right" | "arrowright" => &[0xE04D],
        "end" => &[0xE04F],
        "down" | "arrowdown" => &[0xE050],
        "pagedown" | "pgdn" => &[0xE051],
        "insert" | "ins" => &[0xE052],
        "delete" | "del" => &[0xE053],
        "meta" | "win" | "super" => &[0xE05B],
        _ => return None,
    };
    Some(codes)
}

pub fn break_code(make: u16) -> u16 {
    make | 0x80
}

/// Break sequence for a make sequence: reversed, with bit 7 set.
pub fn break_codes(make: &[u16]) -> Vec<u16> {
    make.iter().rev().map(|&code| break_code(code)).collect()
}
