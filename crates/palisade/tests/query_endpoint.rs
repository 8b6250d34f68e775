mod common;

use common::*;

use anyhow::Context;
use palisade_common::write_file_atomically;

#[test]
fn test_allow_and_deny() -> anyhow::Result<()> {
    const PORT: u16 = 40_311;

    let dir = tempfile::tempdir().with_context(|| "get temporary directory")?;
    let config = test_config(dir.path(), PORT);

    write_file_atomically(&config.access.path, b"# members\nalice\nbob\n")?;

    let addr = config.network.address;

    run_palisade(config);

    let mut client = QueryClient::connect(addr)?;

    assert_eq!(client.query("alice")?, "allow");
    assert_eq!(client.query("Bob")?, "allow");
    assert_eq!(client.query("carol")?, "deny not_listed");
    assert_eq!(client.query("car ol")?, "error invalid_identity");

    Ok(())
}

#[test]
fn test_file_change_is_picked_up() -> anyhow::Result<()> {
    const PORT: u16 = 40_312;

    let dir = tempfile::tempdir().with_context(|| "get temporary directory")?;
    let config = test_config(dir.path(), PORT);
    let path = config.access.path.clone();

    write_file_atomically(&path, b"alice\nbob\n")?;

    let addr = config.network.address;

    run_palisade(config);

    let mut client = QueryClient::connect(addr)?;

    assert_eq!(client.query("carol")?, "deny not_listed");

    write_file_atomically(&path, b"carol\n")?;

    assert!(wait_until(|| client.query("carol").unwrap() == "allow"));
    assert_eq!(client.query("alice")?, "deny not_listed");

    // Malformed update keeps the previous list in effect
    write_file_atomically(&path, b"alice\nnot an identity\n")?;

    ::std::thread::sleep(::std::time::Duration::from_millis(200));

    assert_eq!(client.query("carol")?, "allow");
    assert_eq!(client.query("alice")?, "deny not_listed");

    Ok(())
}

#[test]
fn test_cold_start_fails_closed() -> anyhow::Result<()> {
    const PORT: u16 = 40_313;

    let dir = tempfile::tempdir().with_context(|| "get temporary directory")?;
    let config = test_config(dir.path(), PORT);
    let path = config.access.path.clone();

    write_file_atomically(&path, b"alice\n???\n")?;

    let addr = config.network.address;

    run_palisade(config);

    let mut client = QueryClient::connect(addr)?;

    assert_eq!(client.query("alice")?, "deny store_unavailable");

    write_file_atomically(&path, b"alice\n")?;

    assert!(wait_until(|| client.query("alice").unwrap() == "allow"));

    Ok(())
}
