//! Named character reference table.
//!
//! Covers the HTML4 entity set plus `&apos;`. Lookups are case-sensitive
//! (`&Aacute;` and `&aacute;` decode to different characters).

use phf::phf_map;

static NAMED_ENTITIES: phf::Map<&'static str, &'static str> = phf_map! {
    // Markup-significant
    "quot" => "\"",
    "amp" => "&",
    "lt" => "<",
    "gt" => ">",
    "apos" => "'",
    // Latin-1 supplement
    "nbsp" => "\u{a0}",
    "iexcl" => "¡",
    "cent" => "¢",
    "pound" => "£",
    "curren" => "¤",
    "yen" => "¥",
    "brvbar" => "¦",
    "sect" => "§",
    "uml" => "¨",
    "copy" => "©",
    "ordf" => "ª",
    "laquo" => "«",
    "not" => "¬",
    "shy" => "\u{ad}",
    "reg" => "®",
    "macr" => "¯",
    "deg" => "°",
    "plusmn" => "±",
    "sup2" => "²",
    "sup3" => "³",
    "acute" => "´",
    "micro" => "µ",
    "para" => "¶",
    "middot" => "·",
    "cedil" => "¸",
    "sup1" => "¹",
    "ordm" => "º",
    "raquo" => "»",
    "frac14" => "¼",
    "frac12" => "½",
    "frac34" => "¾",
    "iquest" => "¿",
    "Agrave" => "À",
    "Aacute" => "Á",
    "Acirc" => "Â",
    "Atilde" => "Ã",
    "Auml" => "Ä",
    "Aring" => "Å",
    "AElig" => "Æ",
    "Ccedil" => "Ç",
    "Egrave" => "È",
    "Eacute" => "É",
    "Ecirc" => "Ê",
    "Euml" => "Ë",
    "Igrave" => "Ì",
    "Iacute" => "Í",
    "Icirc" => "Î",
    "Iuml" => "Ï",
    "ETH" => "Ð",
    "Ntilde" => "Ñ",
    "Ograve" => "Ò",
    "Oacute" => "Ó",
    "Ocirc" => "Ô",
    "Otilde" => "Õ",
    "Ouml" => "Ö",
    "times" => "×",
    "Oslash" => "Ø",
    "Ugrave" => "Ù",
    "Uacute" => "Ú",
    "Ucirc" => "Û",
    "Uuml" => "Ü",
    "Yacute" => "Ý",
    "THORN" => "Þ",
    "szlig" => "ß",
    "agrave" => "à",
    "aacute" => "á",
    "acirc" => "â",
    "atilde" => "ã",
    "auml" => "ä",
    "aring" => "å",
    "aelig" => "æ",
    "ccedil" => "ç",
    "egrave" => "è",
    "eacute" => "é",
    "ecirc" => "ê",
    "euml" => "ë",
    "igrave" => "ì",
    "iacute" => "í",
    "icirc" => "î",
    "iuml" => "ï",
    "eth" => "ð",
    "ntilde" => "ñ",
    "ograve" => "ò",
    "oacute" => "ó",
    "ocirc" => "ô",
    "otilde" => "õ",
    "ouml" => "ö",
    "divide" => "÷",
    "oslash" => "ø",
    "ugrave" => "ù",
    "uacute" => "ú",
    "ucirc" => "û",
    "uuml" => "ü",
    "yacute" => "ý",
    "thorn" => "þ",
    "yuml" => "ÿ",
    // Latin extended and spacing modifiers
    "OElig" => "Œ",
    "oelig" => "œ",
    "Scaron" => "Š",
    "scaron" => "š",
    "Yuml" => "Ÿ",
    "fnof" => "ƒ",
    "circ" => "ˆ",
    "tilde" => "˜",
    // Greek
    "Alpha" => "Α",
    "Beta" => "Β",
    "Gamma" => "Γ",
    "Delta" => "Δ",
    "Epsilon" => "Ε",
    "Zeta" => "Ζ",
    "Eta" => "Η",
    "Theta" => "Θ",
    "Iota" => "Ι",
    "Kappa" => "Κ",
    "Lambda" => "Λ",
    "Mu" => "Μ",
    "Nu" => "Ν",
    "Xi" => "Ξ",
    "Omicron" => "Ο",
    "Pi" => "Π",
    "Rho" => "Ρ",
    "Sigma" => "Σ",
    "Tau" => "Τ",
    "Upsilon" => "Υ",
    "Phi" => "Φ",
    "Chi" => "Χ",
    "Psi" => "Ψ",
    "Omega" => "Ω",
    "alpha" => "α",
    "beta" => "β",
    "gamma" => "γ",
    "delta" => "δ",
    "epsilon" => "ε",
    "zeta" => "ζ",
    "eta" => "η",
    "theta" => "θ",
    "iota" => "ι",
    "kappa" => "κ",
    "lambda" => "λ",
    "mu" => "μ",
    "nu" => "ν",
    "xi" => "ξ",
    "omicron" => "ο",
    "pi" => "π",
    "rho" => "ρ",
    "sigmaf" => "ς",
    "sigma" => "σ",
    "tau" => "τ",
    "upsilon" => "υ",
    "phi" => "φ",
    "chi" => "χ",
    "psi" => "ψ",
    "omega" => "ω",
    "thetasym" => "ϑ",
    "upsih" => "ϒ",
    "piv" => "ϖ",
    // General punctuation
    "ensp" => "\u{2002}",
    "emsp" => "\u{2003}",
    "thinsp" => "\u{2009}",
    "zwnj" => "\u{200c}",
    "zwj" => "\u{200d}",
    "lrm" => "\u{200e}",
    "rlm" => "\u{200f}",
    "ndash" => "–",
    "mdash" => "—",
    "lsquo" => "\u{2018}",
    "rsquo" => "\u{2019}",
    "sbquo" => "‚",
    "ldquo" => "\u{201c}",
    "rdquo" => "\u{201d}",
    "bdquo" => "„",
    "dagger" => "†",
    "Dagger" => "‡",
    "bull" => "•",
    "hellip" => "…",
    "permil" => "‰",
    "prime" => "′",
    "Prime" => "″",
    "lsaquo" => "‹",
    "rsaquo" => "›",
    "oline" => "‾",
    "frasl" => "⁄",
    "euro" => "€",
    // Letterlike symbols
    "weierp" => "℘",
    "image" => "ℑ",
    "real" => "ℜ",
    "trade" => "™",
    "alefsym" => "ℵ",
    // Arrows
    "larr" => "←",
    "uarr" => "↑",
    "rarr" => "→",
    "darr" => "↓",
    "harr" => "↔",
    "crarr" => "↵",
    "lArr" => "⇐",
    "uArr" => "⇑",
    "rArr" => "⇒",
    "dArr" => "⇓",
    "hArr" => "⇔",
    // Mathematical operators
    "forall" => "∀",
    "part" => "∂",
    "exist" => "∃",
    "empty" => "∅",
    "nabla" => "∇",
    "isin" => "∈",
    "notin" => "∉",
    "ni" => "∋",
    "prod" => "∏",
    "sum" => "∑",
    "minus" => "−",
    "lowast" => "∗",
    "radic" => "√",
    "prop" => "∝",
    "infin" => "∞",
    "ang" => "∠",
    "and" => "∧",
    "or" => "∨",
    "cap" => "∩",
    "cup" => "∪",
    "int" => "∫",
    "there4" => "∴",
    "sim" => "∼",
    "cong" => "≅",
    "asymp" => "≈",
    "ne" => "≠",
    "equiv" => "≡",
    "le" => "≤",
    "ge" => "≥",
    "sub" => "⊂",
    "sup" => "⊃",
    "nsub" => "⊄",
    "sube" => "⊆",
    "supe" => "⊇",
    "oplus" => "⊕",
    "otimes" => "⊗",
    "perp" => "⊥",
    "sdot" => "⋅",
    // Technical and geometric shapes
    "lceil" => "⌈",
    "rceil" => "⌉",
    "lfloor" => "⌊",
    "rfloor" => "⌋",
    "lang" => "\u{2329}",
    "rang" => "\u{232a}",
    "loz" => "◊",
    "spades" => "♠",
    "clubs" => "♣",
    "hearts" => "♥",
    "diams" => "♦",
};

pub fn named_entity(name: &str) -> Option<&'static str> {
    NAMED_ENTITIES.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_markup_entities() {
        assert_eq!(named_entity("amp"), Some("&"));
        assert_eq!(named_entity("lt"), Some("<"));
        assert_eq!(named_entity("gt"), Some(">"));
        assert_eq!(named_entity("quot"), Some("\""));
        assert_eq!(named_entity("apos"), Some("'"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert_eq!(named_entity("Aacute"), Some("Á"));
        assert_eq!(named_entity("aacute"), Some("á"));
        assert_eq!(named_entity("AMP"), None);
    }

    #[test]
    fn unknown_names_return_none() {
        assert_eq!(named_entity("tbo"), None);
        assert_eq!(named_entity(""), None);
    }
}
