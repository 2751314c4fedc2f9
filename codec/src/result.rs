//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while framing or serializing an XML stream.
///
/// Every variant is fatal for the stream it occurred on: once the byte stream
/// is no longer well-formed there is no reliable point to resynchronize at.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading from or writing to the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The XML tokenizer rejected the input (mismatched tags, bad attributes,
    /// invalid escapes).
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The input was well-formed XML but not a valid stream structure,
    /// e.g. character data between top-level stanzas.
    #[error("Malformed stream: {0}")]
    Malformed(String),

    /// A single pending stanza grew beyond the configured limit.
    #[error("Stanza exceeds maximum size of {limit} bytes")]
    StanzaTooLarge {
        /// The configured limit in bytes
        limit: usize,
    },

    /// Element names, attribute values or text were not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl CodecError {
    /// Shorthand for constructing a [`CodecError::Malformed`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        CodecError::Malformed(reason.into())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CodecError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        CodecError::Xml(quick_xml::Error::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodecError::StanzaTooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "Stanza exceeds maximum size of 1024 bytes");

        let err = CodecError::malformed("text outside of stanza");
        assert_eq!(err.to_string(), "Malformed stream: text outside of stanza");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: CodecError = io.into();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
