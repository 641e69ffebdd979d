//! Render request validation. Everything here runs before any rendering
//! resource is allocated.

use crate::{Error, ImageFormat, RenderOptions, Result, Size, MAX_DIMENSION, MAX_TEXT_LEN, MIN_DIMENSION};

/// A validated render request
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest<'a> {
    pub text: &'a str,
    pub size: Size,
    pub format: ImageFormat,
}

impl<'a> RenderRequest<'a> {
    /// Validate with the default text limit
    pub fn new(text: &'a str, options: RenderOptions) -> Result<Self> {
        Self::with_limit(text, options, MAX_TEXT_LEN)
    }

    pub fn with_limit(text: &'a str, options: RenderOptions, max_text_len: usize) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(Error::ValidationError("text is required".into()));
        }
        if text.len() > max_text_len {
            return Err(Error::ValidationError(format!(
                "text is {} bytes, limit is {}",
                text.len(),
                max_text_len
            )));
        }
        check_dimension("width", options.width)?;
        check_dimension("height", options.height)?;

        Ok(Self {
            text,
            size: options.size(),
            format: options.format,
        })
    }
}

fn check_dimension(name: &str, value: u32) -> Result<()> {
    if (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        Ok(())
    } else {
        Err(Error::ValidationError(format!(
            "{} must be between {} and {}, got {}",
            name, MIN_DIMENSION, MAX_DIMENSION, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn opts(width: u32, height: u32) -> RenderOptions {
        RenderOptions {
            width,
            height,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_the_inclusive_range() {
        for (w, h) in [(100, 100), (10_000, 10_000), (2400, 1800), (800, 600)] {
            let req = RenderRequest::new("# A", opts(w, h)).unwrap();
            assert_eq!(req.size, Size { width: w, height: h });
        }
    }

    #[test]
    fn rejects_out_of_range_dimensions() {
        for (w, h) in [(99, 600), (800, 99), (10_001, 600), (800, 10_001), (0, 0)] {
            let err = RenderRequest::new("# A", opts(w, h)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}x{}", w, h);
        }
        let err = RenderRequest::new("# A", opts(50, 600)).unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn rejects_missing_text() {
        assert_eq!(
            RenderRequest::new("", RenderOptions::default()).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            RenderRequest::new(" \n\t ", RenderOptions::default()).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn rejects_oversized_text() {
        let text = "x".repeat(33);
        let err = RenderRequest::with_limit(&text, RenderOptions::default(), 32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(RenderRequest::with_limit(&text, RenderOptions::default(), 33).is_ok());
    }
}
