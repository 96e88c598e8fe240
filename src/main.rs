use waha_provision::{Pipeline, logging};

fn main() -> anyhow::Result<()> {
    logging::init();
    Pipeline::new().run()?;
    Ok(())
}
