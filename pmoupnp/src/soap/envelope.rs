//! Structures de l'enveloppe SOAP

use xmltree::Element;

/// Enveloppe SOAP complète
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// En-tête SOAP optionnel
    pub header: Option<SoapHeader>,

    /// Corps SOAP contenant la réponse ou le fault
    pub body: SoapBody,
}

#[derive(Debug, Clone)]
pub struct SoapHeader {
    pub content: Element,
}

#[derive(Debug, Clone)]
pub struct SoapBody {
    pub content: Element,
}

impl SoapBody {
    /// Premier élément enfant dont le nom se termine par `suffix`
    /// (les préfixes de namespace varient d'un fabricant à l'autre).
    pub fn child_with_suffix(&self, suffix: &str) -> Option<&Element> {
        find_child_with_suffix(&self.content, suffix)
    }
}

/// Cherche un enfant direct par suffixe de nom
pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent
        .children
        .iter()
        .filter_map(|node| node.as_element())
        .find(|elem| elem.name.ends_with(suffix))
}
