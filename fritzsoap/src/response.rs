use xmltree::Element;

use crate::envelope;
use crate::error::Result;
use crate::fault::find_descendant;

/// Parsed response of a successful untyped invocation.
#[derive(Debug, Clone)]
pub struct SoapResponse {
    document: Element,
}

impl SoapResponse {
    pub fn new(document: Element) -> Self {
        Self { document }
    }

    /// Root element of the response (normally the `Envelope`).
    pub fn document(&self) -> &Element {
        &self.document
    }

    pub fn into_document(self) -> Element {
        self.document
    }

    /// The `<Action>Response` element inside the body.
    pub fn action_response(&self) -> Option<&Element> {
        envelope::body_action(&self.document)
    }

    /// Output arguments in document order.
    pub fn arguments(&self) -> Result<Vec<(String, String)>> {
        envelope::action_arguments(&self.document)
    }

    /// Text of the first element named `name`, searched through the whole document.
    pub fn value(&self, name: &str) -> Option<String> {
        find_descendant(&self.document, name)
            .map(|e| e.get_text().map(|t| t.into_owned()).unwrap_or_default())
    }
}
