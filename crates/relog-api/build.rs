fn main() {
    // Compile the log service and gossip membership protos
    tonic_prost_build::configure()
        .compile_protos(&["proto/log.proto", "proto/membership.proto"], &["proto"])
        .unwrap();
}
