//! Character set detection for text-like sources.
//!
//! A byte order mark decides when present (UTF-8, UTF-16, UTF-32). Valid
//! UTF-8 is taken as is. Anything else goes through `chardetng`, which covers
//! the legacy Cyrillic code pages (windows-1251, KOI8-R, IBM866, ISO-8859-5)
//! along with the other single and multi-byte encodings of the web.

use super::Converted;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;

const UTF32_LE_BOM: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const UTF32_BE_BOM: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

/// Text decoded from bytes of unknown encoding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decoded {
    pub text: String,
    /// WHATWG name of the encoding used, e.g. `windows-1251`.
    pub encoding: &'static str,
    /// Malformed sequences were replaced with U+FFFD.
    pub lossy: bool,
    /// The encoding came from a BOM, valid UTF-8, or a detector guess that
    /// beat the other candidates.
    pub confident: bool,
}

impl Decoded {
    /// Record the encoding on a conversion; doubtful decodes make it partial.
    pub fn annotate(&self, converted: Converted) -> Converted {
        let converted = converted.with_meta("encoding", self.encoding);
        if self.lossy || !self.confident {
            converted
                .with_meta("encoding_confident", false)
                .partial(true)
        } else {
            converted
        }
    }
}

pub(crate) fn decode_text(bytes: &[u8]) -> Decoded {
    // Checked first: the UTF-32LE mark starts with the UTF-16LE one
    if let Some(payload) = bytes.strip_prefix(UTF32_LE_BOM) {
        return decode_utf32(payload, u32::from_le_bytes, "utf-32le");
    }
    if let Some(payload) = bytes.strip_prefix(UTF32_BE_BOM) {
        return decode_utf32(payload, u32::from_be_bytes, "utf-32be");
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, lossy) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return Decoded {
            text: text.into_owned(),
            encoding: encoding.name(),
            lossy,
            confident: true,
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Decoded {
            text: text.to_string(),
            encoding: encoding_rs::UTF_8.name(),
            lossy: false,
            confident: true,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let (encoding, confident) = detector.guess_assess(None, false);
    let (text, lossy) = encoding.decode_without_bom_handling(bytes);
    Decoded {
        text: text.into_owned(),
        encoding: encoding.name(),
        lossy,
        confident,
    }
}

fn decode_utf32(payload: &[u8], unit: fn([u8; 4]) -> u32, name: &'static str) -> Decoded {
    let mut text = String::with_capacity(payload.len() / 4);
    let mut lossy = payload.len() % 4 != 0;
    for chunk in payload.chunks_exact(4) {
        match char::from_u32(unit([chunk[0], chunk[1], chunk[2], chunk[3]])) {
            Some(c) => text.push(c),
            None => {
                text.push(char::REPLACEMENT_CHARACTER);
                lossy = true;
            }
        }
    }
    if payload.len() % 4 != 0 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    Decoded {
        text,
        encoding: name,
        lossy,
        confident: true,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A paragraph long enough for the detector to settle on a code page.
    pub const RUSSIAN: &str = "Подключение к корпоративной сети выполняется через клиент, \
        который можно скачать на внутреннем портале. Столовая открывается в полдень \
        по будним дням, а по пятницам работает до четырёх часов. Отчёты за квартал \
        хранятся в общей папке отдела.";

    pub fn windows_1251(text: &str) -> Vec<u8> {
        let (bytes, _, unmappable) = encoding_rs::WINDOWS_1251.encode(text);
        assert!(!unmappable);
        bytes.into_owned()
    }

    pub fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|unit| unit.to_le_bytes()));
        bytes
    }
}
