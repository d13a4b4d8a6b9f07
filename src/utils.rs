/// Formats `buffer` as 16-byte lines labelled from `base`, with an ASCII column.
pub fn hexdump(buffer: &[u8], base: u32) -> String {
    let mut str = String::new();
    for (i, chunk) in buffer.chunks(16).enumerate() {
        let addr = base.wrapping_add(i as u32 * 16) & 0xF_FFFF;
        let mut line = format!("{:05X}: ", addr);
        let mut chars = String::new();
        for &byte in chunk {
            line.push_str(&format!("{:02X} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        let dump_line = format!("{:<55} {}\n", line, chars);
        str.push_str(&dump_line);
    }

    str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_lines() {
        let data: Vec<u8> = (0x40..0x54).collect();
        let dump = hexdump(&data, 0xFFFF0);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("FFFF0: 40 41 42"));
        assert!(lines[0].ends_with("@ABCDEFGHIJKLMNO"));
        assert!(lines[1].starts_with("00000: 50 51 52 53"));
        assert!(lines[1].ends_with("PQRS"));
    }
}
