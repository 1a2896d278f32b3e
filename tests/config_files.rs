// tests/config_files.rs
// JSON pipeline configs read from disk

use std::path::PathBuf;

use ibl_temporal::{HiZReduction, PipelineConfig};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ibl_temporal_cfg_{}_{name}", std::process::id()))
}

#[test]
fn file_with_overrides_loads() {
    let path = temp_path("pipeline.json");
    std::fs::write(
        &path,
        r#"{
            "environment": { "cubemap_resolution": 128, "prefiltered_mips": 4 },
            "hiz": { "reduction": "max" },
            "taa": { "filter_history": false }
        }"#,
    )
    .unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.environment.cubemap_resolution, 128);
    assert_eq!(config.environment.prefiltered_mips, 4);
    assert_eq!(config.environment.brdf_lut_resolution, 512);
    assert_eq!(config.hiz.reduction, HiZReduction::Max);
    assert!(!config.taa.filter_history);
    assert_eq!(config.sharpen.amount, 0.2);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn saved_config_reloads_identically() {
    let path = temp_path("saved.json");
    let mut config = PipelineConfig::default();
    config.environment.cache_dir = Some(PathBuf::from("ibl-cache"));
    config.hiz.mip_count = Some(6);
    std::fs::write(&path, config.to_json_string().unwrap()).unwrap();
    assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), config);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn invalid_file_contents_are_config_errors() {
    let path = temp_path("invalid.json");
    std::fs::write(&path, r#"{ "environment": { "brdf_lut_resolution": 100 } }"#).unwrap();
    let err = PipelineConfig::from_json_file(&path).unwrap_err();
    assert_eq!(err.category(), "Config");
    let _ = std::fs::remove_file(&path);

    let err = PipelineConfig::from_json_file(temp_path("absent.json")).unwrap_err();
    assert_eq!(err.category(), "IO");
}
