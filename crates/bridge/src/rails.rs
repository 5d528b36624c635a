// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framework-aware introspection over the evaluation glue. Each helper
//! degrades to a plain message when the framework is not loaded.

use crate::error::Result;
use crate::session::DebugSession;

const NOT_RAILS: &str = "Rails is not loaded in this process.";

/// Tabulate the application's routes: verb, path, controller#action.
pub async fn routes(session: &DebugSession) -> Result<String> {
    let code = r##"
if defined?(Rails) && Rails.respond_to?(:application) && Rails.application
  Rails.application.routes.routes.each do |r|
    verb = r.verb.to_s
    path = r.path.spec.to_s.sub("(.:format)", "")
    reqs = r.requirements
    action = reqs[:controller] ? "#{reqs[:controller]}##{reqs[:action]}" : r.name.to_s
    puts "#{verb.ljust(8)} #{path.ljust(40)} #{action}" unless path.start_with?("/rails")
  end
  nil
else
  puts "__not_rails__"
  nil
end
"##;
    render(session, code).await
}

/// Column and association listing for one model.
pub async fn model(session: &DebugSession, name: &str) -> Result<String> {
    let code = format!(
        r##"
if defined?(Rails)
  begin
    klass = Object.const_get({name:?})
    puts "#{{klass.name}} (table: #{{klass.table_name}})"
    klass.columns.each do |c|
      puts "  #{{c.name.ljust(24)}} #{{c.sql_type.ljust(16)}} null=#{{c.null}} default=#{{c.default.inspect}}"
    end
    if klass.respond_to?(:reflect_on_all_associations)
      klass.reflect_on_all_associations.each do |a|
        puts "  -> #{{a.macro}} :#{{a.name}}"
      end
    end
  rescue NameError
    puts "model #{{{name:?}}} is not defined"
  end
  nil
else
  puts "__not_rails__"
  nil
end
"##
    );
    render(session, &code).await
}

/// Versions, environment, root, and database adapter.
pub async fn info(session: &DebugSession) -> Result<String> {
    let code = r##"
if defined?(Rails)
  puts "Rails:   #{Rails.version}"
  puts "Ruby:    #{RUBY_VERSION}"
  puts "Env:     #{Rails.env}"
  puts "Root:    #{Rails.root}"
  puts "Eager:   #{Rails.application.config.eager_load.inspect}" if Rails.respond_to?(:application) && Rails.application
  if defined?(ActiveRecord::Base)
    puts "DB:      #{ActiveRecord::Base.connection_db_config.adapter}" rescue nil
  end
  nil
else
  puts "__not_rails__"
  nil
end
"##;
    render(session, code).await
}

async fn render(session: &DebugSession, code: &str) -> Result<String> {
    let eval = session.evaluate(code).await?;
    if let Some(err) = eval.error {
        return Ok(format!("introspection raised: {err}"));
    }
    let out = eval.captured_stdout.trim().to_owned();
    if out.contains("__not_rails__") {
        return Ok(NOT_RAILS.to_owned());
    }
    if out.is_empty() {
        return Ok("(no output)".to_owned());
    }
    Ok(out)
}

#[cfg(test)]
#[path = "rails_tests.rs"]
mod tests;
