/// Reverses every complete (i.e. newline terminated) line in `received`, returning the reversed
///  lines with their newlines. Data after the last newline is not part of a line yet and is
///  ignored.
///
/// The result for a longer input always starts with the result for any of its prefixes, so it can
///  be recomputed from scratch whenever more data arrives without changing anything that was
///  sent before.
pub fn reverse_lines(received: &[u8]) -> Vec<u8> {
    let complete_len = match received.iter().rposition(|&b| b == b'\n') {
        Some(idx) => idx + 1,
        None => return Vec::new(),
    };

    let mut result = Vec::with_capacity(complete_len);
    for line in received[..complete_len].split_inclusive(|&b| b == b'\n') {
        reverse_line_into(&line[..line.len() - 1], &mut result);
        result.push(b'\n');
    }
    result
}

/// Lines are reversed character by character if they are valid UTF-8, and byte by byte otherwise
fn reverse_line_into(line: &[u8], result: &mut Vec<u8>) {
    match std::str::from_utf8(line) {
        Ok(s) => {
            let mut char_buf = [0u8; 4];
            for c in s.chars().rev() {
                result.extend_from_slice(c.encode_utf8(&mut char_buf).as_bytes());
            }
        }
        Err(_) => result.extend(line.iter().rev()),
    }
}
