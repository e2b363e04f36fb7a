use std::path::{Path, PathBuf};

/// A GGUF build the backend knows how to fetch and serve locally.
#[derive(Clone, Debug)]
pub struct GgufModel {
    pub id: &'static str,
    pub display_name: &'static str,
    pub url: &'static str,
    pub filename: &'static str,
    /// Approximate size, used when the download response has no length header.
    pub size_bytes: u64,
}

impl GgufModel {
    /// Where this model lives inside a models directory.
    pub fn path_in(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.filename)
    }

    pub fn is_downloaded(&self, models_dir: &Path) -> bool {
        self.path_in(models_dir).is_file()
    }
}

pub static QWEN_2_5_3B: GgufModel = GgufModel {
    id: "qwen2.5-3b-instruct",
    display_name: "Qwen 2.5 3B Instruct",
    url: "https://huggingface.co/Qwen/Qwen2.5-3B-Instruct-GGUF/resolve/main/qwen2.5-3b-instruct-q4_k_m.gguf",
    filename: "qwen2.5-3b-instruct-q4_k_m.gguf",
    size_bytes: 2_100_000_000,
};

pub static LLAMA_3_2_3B: GgufModel = GgufModel {
    id: "llama-3.2-3b-instruct",
    display_name: "Llama 3.2 3B Instruct",
    url: "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf",
    filename: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
    size_bytes: 2_020_000_000,
};

pub static PHI_3_5_MINI: GgufModel = GgufModel {
    id: "phi-3.5-mini-instruct",
    display_name: "Phi 3.5 Mini Instruct",
    url: "https://huggingface.co/bartowski/Phi-3.5-mini-instruct-GGUF/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf",
    filename: "Phi-3.5-mini-instruct-Q4_K_M.gguf",
    size_bytes: 2_390_000_000,
};

static ALL_MODELS: &[&GgufModel] = &[&QWEN_2_5_3B, &LLAMA_3_2_3B, &PHI_3_5_MINI];

pub fn find_model(id: &str) -> Option<&'static GgufModel> {
    ALL_MODELS.iter().find(|m| m.id == id).copied()
}

pub fn all_models() -> &'static [&'static GgufModel] {
    ALL_MODELS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_known_models() {
        assert!(find_model("qwen2.5-3b-instruct").is_some());
        assert!(find_model("llama-3.2-3b-instruct").is_some());
        assert!(find_model("phi-3.5-mini-instruct").is_some());
        assert!(find_model("nonexistent").is_none());
    }

    #[test]
    fn all_models_listed() {
        assert_eq!(all_models().len(), 3);
    }

    #[test]
    fn path_in_joins_filename() {
        let p = QWEN_2_5_3B.path_in(Path::new("/data/models"));
        assert_eq!(
            p,
            PathBuf::from("/data/models/qwen2.5-3b-instruct-q4_k_m.gguf")
        );
    }

    #[test]
    fn missing_file_is_not_downloaded() {
        let dir = std::env::temp_dir().join("cohost-catalog-test-empty");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(!QWEN_2_5_3B.is_downloaded(&dir));
    }

    #[test]
    fn present_file_is_downloaded() {
        let dir = std::env::temp_dir().join(format!("cohost-catalog-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(QWEN_2_5_3B.path_in(&dir), b"stub").unwrap();
        assert!(QWEN_2_5_3B.is_downloaded(&dir));
    }
}
