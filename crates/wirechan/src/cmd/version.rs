use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("wirechan {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: wirechan");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "framing_version: {}.{}",
        wirechan_framing::FRAMING_VERSION.0,
        wirechan_framing::FRAMING_VERSION.1
    );
    println!(
        "default_protocol_version: {}",
        wirechan_encoding::ProtocolVersion::default()
    );

    Ok(SUCCESS)
}
