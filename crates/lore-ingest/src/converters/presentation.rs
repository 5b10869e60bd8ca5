//! Presentations, one section per slide.

use super::xml::{numbered_parts, open_archive, read_part, reader};
use super::{Capability, Converted, Converter};
use crate::error::ConvertError;
use async_trait::async_trait;
use lore_core::TypeSignature;
use quick_xml::events::Event;

#[derive(Debug, Clone, Copy, Default)]
pub struct PresentationConverter;

#[async_trait]
impl Converter for PresentationConverter {
    fn capability(&self) -> Capability {
        Capability::Presentation
    }

    async fn convert(
        &self,
        bytes: &[u8],
        _signature: &TypeSignature,
    ) -> Result<Converted, ConvertError> {
        let slides = pptx_slides(bytes)?;
        let mut text = String::new();
        for (i, paragraphs) in slides.iter().enumerate() {
            text.push_str(&format!("## Slide {}\n\n", i + 1));
            for paragraph in paragraphs {
                text.push_str(paragraph);
                text.push_str("\n\n");
            }
        }
        Ok(Converted::new(text).with_meta("slides", slides.len()))
    }
}

/// Text paragraphs of each slide, in slide order.
pub(crate) fn pptx_slides(bytes: &[u8]) -> Result<Vec<Vec<String>>, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let names = numbered_parts(&archive, "ppt/slides/slide", ".xml");
    if names.is_empty() {
        return Err(ConvertError::failed("no slides found"));
    }

    let mut slides = Vec::with_capacity(names.len());
    for name in names {
        let xml = read_part(&mut archive, &name)?;
        slides.push(slide_paragraphs(&xml)?);
    }
    Ok(slides)
}

fn slide_paragraphs(xml: &[u8]) -> Result<Vec<String>, ConvertError> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut r = reader(xml);
    let mut buf = Vec::new();

    loop {
        match r.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"br" => current.push(' '),
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}
