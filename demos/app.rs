use std::sync::Arc;

use autoinit::{get_instance, AutoInit, InitContext, InitError};

#[derive(AutoInit, Debug)]
#[auto_init(singleton)]
struct AppModel;

#[derive(AutoInit, Debug)]
struct AppView {
    model: Option<Arc<AppModel>>,
}

#[derive(AutoInit, Debug)]
struct AppPresenter {
    model: Option<Arc<AppModel>>,
}

#[derive(AutoInit, Debug)]
struct App {
    model: Option<Arc<AppModel>>,
    view: AppView,
    presenter: AppPresenter,
}

fn main() -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app: App = get_instance()?;
    let model = app.model.as_ref().unwrap();
    assert!(Arc::ptr_eq(model, app.view.model.as_ref().unwrap()));
    assert!(Arc::ptr_eq(model, app.presenter.model.as_ref().unwrap()));
    println!("one model drives the whole graph: {app}");

    // A scoped override switches the model off for every consumer at once.
    let headless = InitContext::new();
    headless.register_instance::<Option<Arc<AppModel>>>(None);
    {
        let _scope = headless.enter();
        let app: App = get_instance()?;
        assert!(app.view.model.is_none());
        println!("with the model provided away: {app}");
    }

    Ok(())
}
