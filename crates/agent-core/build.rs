use std::io::Result;

fn main() -> Result<()> {
    tonic_build::configure()
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .type_attribute(".", "#[serde(default)]")
        .compile_protos(&["../../proto/agent_service.proto"], &["../../proto/"])?;
    println!("cargo:rerun-if-changed=../../proto/agent_service.proto");
    Ok(())
}
