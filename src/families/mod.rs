mod skin;

pub use skin::{parse_skin_ini, SkinFamily, SkinInfo, SkinIniMetadata};
