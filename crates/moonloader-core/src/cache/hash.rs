use crate::transpiler::CompileOptions;

/// Hash compile options so a manifest written under different options is
/// never trusted.
pub fn hash_options(options: &CompileOptions) -> String {
    let json = serde_json::to_string(options).expect("compile options always serialize");
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_options_consistency() {
        let options = CompileOptions::default();
        assert_eq!(hash_options(&options), hash_options(&options));
    }

    #[test]
    fn test_hash_options_differs_on_change() {
        let options = CompileOptions::default();
        let changed = CompileOptions {
            implicitly_return_root: false,
            ..CompileOptions::default()
        };
        assert_ne!(hash_options(&options), hash_options(&changed));
    }
}
