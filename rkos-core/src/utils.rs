// Parses one 2-hex-digit byte token ("A9" -> 0xA9)
pub fn parse_hex_byte(token: &str) -> Result<u8, &'static str> {
    if token.len() != 2 {
        return Err("byte token must be exactly two hex digits");
    }
    u8::from_str_radix(token, 16).map_err(|_| "byte token is not valid hex")
}

// Parses a whitespace-separated string of 2-hex-digit byte tokens into
// a program image
pub fn parse_hex_program(text: &str) -> Result<Vec<u8>, &'static str> {
    let mut bytes = Vec::new();
    for token in text.split_whitespace() {
        bytes.push(parse_hex_byte(token)?);
    }
    if bytes.is_empty() {
        return Err("program contains no byte tokens");
    }
    Ok(bytes)
}

// Formats a byte slice as space-separated hex tokens, the inverse of
// parse_hex_program
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

// Renders process-memory bytes as text, stopping at the terminator;
// non-printable bytes come out as '.'
pub fn bytes_to_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
