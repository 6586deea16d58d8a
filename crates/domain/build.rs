fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=proto/wire.proto");
    unsafe { std::env::set_var("PROTOC", protobuf_src::protoc()) };
    prost_build::Config::new()
        .extern_path(".google.protobuf", "::prost_types")
        .compile_protos(&["proto/wire.proto"], &["proto/"])?;
    Ok(())
}
